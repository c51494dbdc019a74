// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

/// Decoupled from atrium's internal representation so we own the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

fn blob_type() -> String {
    "blob".to_string()
}

/// Content link inside a blob ref (`{"$link": "<cid>"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// Reference to an uploaded blob, in the shape records embed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    #[serde(rename = "$type", default = "blob_type")]
    blob_type: String,
    #[serde(rename = "ref")]
    pub reference: BlobLink,
    pub mime_type: String,
    pub size: u64,
}

impl MediaBlob {
    pub fn new(cid: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            blob_type: blob_type(),
            reference: BlobLink { link: cid.into() },
            mime_type: mime_type.into(),
            size,
        }
    }

    pub fn cid(&self) -> &str {
        &self.reference.link
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    /// Round a pixel size to the integer ratio records carry.
    /// Returns `None` for degenerate sizes.
    pub fn from_size(width: f64, height: f64) -> Option<Self> {
        if !(width >= 1.0 && height >= 1.0) || !width.is_finite() || !height.is_finite() {
            return None;
        }
        Some(Self {
            width: width.round() as u32,
            height: height.round() as u32,
        })
    }
}

/// `app.bsky.embed.video` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEmbed {
    #[serde(rename = "$type")]
    pub embed_type: &'static str,
    pub video: MediaBlob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// One image inside an `app.bsky.embed.images` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedImage {
    pub image: MediaBlob,
    pub alt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
}

/// `app.bsky.embed.images` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagesEmbed {
    #[serde(rename = "$type")]
    pub embed_type: &'static str,
    pub images: Vec<EmbeddedImage>,
}

pub const VIDEO_EMBED_TYPE: &str = "app.bsky.embed.video";
pub const IMAGES_EMBED_TYPE: &str = "app.bsky.embed.images";

/// Posts carry at most this many images.
pub const MAX_EMBEDDED_IMAGES: usize = 4;

impl ImagesEmbed {
    /// `None` when there is nothing to embed. Images past the fourth are dropped.
    pub fn new(mut images: Vec<EmbeddedImage>) -> Option<Self> {
        if images.is_empty() {
            return None;
        }
        images.truncate(MAX_EMBEDDED_IMAGES);
        Some(Self {
            embed_type: IMAGES_EMBED_TYPE,
            images,
        })
    }
}
