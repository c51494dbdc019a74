// SPDX-License-Identifier: MPL-2.0

mod manager;
mod service;
mod status;
mod transport;

pub use manager::MediaUploadManager;
pub use service::{ErrorBody, JobPhase, JobStatus, UploadLimits, VideoEndpoints, parse_job_status};
pub use status::{UploadSnapshot, UploadStatus};
pub use transport::{
    ProgressStream, ReqwestTransport, TransportError, TransportResponse, UploadProgress,
    VideoTransport,
};
