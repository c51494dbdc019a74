// SPDX-License-Identifier: MPL-2.0

//! Media uploads for Bluesky posts.
//!
//! Images are recompressed to fit the PDS blob limit and uploaded with
//! `com.atproto.repo.uploadBlob`. Videos go to the video service, which
//! transcodes them and hands back a blob once the job completes;
//! [`MediaUploadManager`] drives that exchange and publishes its progress.

pub mod atproto;
pub mod config;
pub mod error;
pub mod media;
pub mod runtime;
pub mod upload;

pub use atproto::{AtprotoClient, MediaBlob, VideoEmbed};
pub use error::{MediaError, Result};
pub use media::{ImagePreparer, PreparedImage};
pub use upload::{MediaUploadManager, UploadSnapshot, UploadStatus};
