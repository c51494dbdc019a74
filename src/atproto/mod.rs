// SPDX-License-Identifier: MPL-2.0

mod client;
mod types;

pub use client::{AtprotoClient, BlobRpc, ClientError};
pub use types::{
    AspectRatio, BlobLink, EmbeddedImage, IMAGES_EMBED_TYPE, ImagesEmbed, MAX_EMBEDDED_IMAGES,
    MediaBlob, Session, VIDEO_EMBED_TYPE, VideoEmbed,
};
