// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

/// Failures surfaced by the media pipeline. Every variant is terminal for the
/// upload that produced it; retrying means calling the upload again.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("no authenticated client available")]
    NoClientAvailable,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
    #[error("video processing timed out")]
    ProcessingTimeout,
    #[error("upload cancelled")]
    Cancelled,
    #[error("an upload is already in progress")]
    UploadInProgress,
}

impl MediaError {
    pub fn processing(reason: impl Into<String>) -> Self {
        Self::ProcessingFailed(reason.into())
    }

    pub fn upload(reason: impl Into<String>) -> Self {
        Self::UploadFailed(reason.into())
    }

    /// The message shown to the user, without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            Self::AuthenticationFailed(reason)
            | Self::UploadFailed(reason)
            | Self::ProcessingFailed(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T, E = MediaError> = std::result::Result<T, E>;
