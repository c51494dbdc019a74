// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

pub const DEFAULT_PDS: &str = "https://bsky.social";

/// XRPC base of the video processing service.
pub const VIDEO_SERVICE_URL: &str = "https://video.bsky.app/xrpc";
pub const VIDEO_SERVICE_DID: &str = "did:web:video.bsky.app";

pub const GET_UPLOAD_LIMITS_NSID: &str = "app.bsky.video.getUploadLimits";
pub const UPLOAD_VIDEO_NSID: &str = "app.bsky.video.uploadVideo";
pub const GET_JOB_STATUS_NSID: &str = "app.bsky.video.getJobStatus";
pub const UPLOAD_BLOB_NSID: &str = "com.atproto.repo.uploadBlob";

/// Target size for prepared images; the PDS rejects blobs over 1 MB.
pub const IMAGE_BYTE_BUDGET: usize = 900_000;

pub const MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;
pub const MAX_VIDEO_DURATION: Duration = Duration::from_secs(180);

pub const SERVICE_AUTH_LIFETIME: Duration = Duration::from_secs(1800);

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_POLL_ATTEMPTS: u32 = 30;
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// Length of the random stem in `<name>.mp4` upload names.
pub const UPLOAD_NAME_LEN: usize = 12;
