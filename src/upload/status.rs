// SPDX-License-Identifier: MPL-2.0

use crate::atproto::MediaBlob;

/// Where a video upload stands, as observed by the UI.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UploadStatus {
    #[default]
    NotStarted,
    /// Bytes leaving the device, 0..=1.
    Uploading(f64),
    /// Server-side transcoding, 0..=1.
    Processing(f64),
    Complete,
    Failed(String),
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Complete | UploadStatus::Failed(_) | UploadStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UploadStatus::Uploading(_) | UploadStatus::Processing(_)
        )
    }

    /// Progress within the current phase, if the phase has one.
    pub fn progress(&self) -> Option<f64> {
        match self {
            UploadStatus::Uploading(p) | UploadStatus::Processing(p) => Some(*p),
            UploadStatus::Complete => Some(1.0),
            _ => None,
        }
    }
}

/// Everything an observer can read about the manager's current upload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UploadSnapshot {
    pub status: UploadStatus,
    pub job_id: Option<String>,
    pub blob: Option<MediaBlob>,
}
