// SPDX-License-Identifier: MPL-2.0

//! Image preparation for blob upload.
//!
//! Every picked or captured image leaves here as a single JPEG that tries to
//! fit under [`IMAGE_BYTE_BUDGET`]:
//! - HEIC input is converted through a pluggable decoder
//! - JPEG quality steps down from 1.0 in 0.1 increments
//! - when quality bottoms out the bitmap is scaled down once more
//!
//! The budget is best-effort. Very noisy images can still come out over it.

use crate::config::IMAGE_BYTE_BUDGET;
use crate::error::{MediaError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Quality used when converting HEIC to JPEG, in percent.
const HEIC_CONVERSION_QUALITY: u8 = 90;
/// Quality after the dimensional fallback, in percent.
const FALLBACK_QUALITY: u8 = 70;
const QUALITY_STEP: u8 = 10;
const MIN_QUALITY: u8 = 10;

/// Container format detected from leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Heic,
    Unknown,
}

impl ImageFormat {
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageFormat::Jpeg
        } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            ImageFormat::Png
        } else if data.starts_with(&[0x00, 0x00, 0x01]) {
            ImageFormat::Heic
        } else {
            ImageFormat::Unknown
        }
    }
}

/// Platform codec able to decode HEIC, which the `image` crate cannot.
pub trait HeicDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage>;
}

/// A JPEG ready for `uploadBlob`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Default)]
pub struct ImagePreparer {
    heic: Option<Box<dyn HeicDecoder>>,
}

impl ImagePreparer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heic_decoder(mut self, decoder: impl HeicDecoder + 'static) -> Self {
        self.heic = Some(Box::new(decoder));
        self
    }

    /// Normalize arbitrary image bytes into a budget-sized JPEG.
    pub fn prepare(&self, data: &[u8]) -> Result<PreparedImage> {
        self.prepare_with_budget(data, IMAGE_BYTE_BUDGET)
    }

    fn prepare_with_budget(&self, data: &[u8], budget: usize) -> Result<PreparedImage> {
        let format = ImageFormat::sniff(data);
        debug!(?format, size = data.len(), "preparing image");

        if format == ImageFormat::Jpeg && data.len() <= budget {
            let (width, height) = jpeg_dimensions(data)?;
            return Ok(PreparedImage {
                data: data.to_vec(),
                width,
                height,
            });
        }

        let img = self.decode(format, data)?;
        let img = DynamicImage::ImageRgb8(img.to_rgb8());
        let (width, height) = img.dimensions();

        // An input that already fits is never answered with something bigger.
        let target = if format != ImageFormat::Heic && data.len() <= budget {
            data.len()
        } else {
            budget
        };

        let (start, first) = if format == ImageFormat::Heic {
            let converted = encode_jpeg(&img, HEIC_CONVERSION_QUALITY)?;
            if converted.len() <= budget {
                return Ok(PreparedImage {
                    data: converted,
                    width,
                    height,
                });
            }
            (HEIC_CONVERSION_QUALITY, converted)
        } else {
            (100, encode_jpeg(&img, 100)?)
        };

        let (quality, encoded) =
            step_down_quality(start, first, target, |quality| encode_jpeg(&img, quality))?;

        if encoded.len() <= budget {
            debug!(quality, size = encoded.len(), "image fits budget");
            return Ok(PreparedImage {
                data: encoded,
                width,
                height,
            });
        }

        let scale = (budget as f64 / encoded.len() as f64).sqrt();
        let new_width = ((width as f64 * scale) as u32).max(1);
        let new_height = ((height as f64 * scale) as u32).max(1);
        debug!(
            scale,
            new_width, new_height, "quality floor reached, downscaling"
        );

        let resized = img.resize_exact(new_width, new_height, FilterType::Triangle);
        let data = encode_jpeg(&resized, FALLBACK_QUALITY)?;
        Ok(PreparedImage {
            data,
            width: new_width,
            height: new_height,
        })
    }

    fn decode(&self, format: ImageFormat, data: &[u8]) -> Result<DynamicImage> {
        if format == ImageFormat::Heic {
            let decoder = self
                .heic
                .as_ref()
                .ok_or_else(|| MediaError::processing("HEIC images are not supported here"))?;
            return decoder.decode(data);
        }

        image::load_from_memory(data)
            .map_err(|e| MediaError::processing(format!("could not decode image: {e}")))
    }
}

/// Lower quality one step at a time from `start` until the encoding is within
/// `target` or the quality floor is reached. `first` is the encoding at `start`.
fn step_down_quality(
    start: u8,
    first: Vec<u8>,
    target: usize,
    mut encode: impl FnMut(u8) -> Result<Vec<u8>>,
) -> Result<(u8, Vec<u8>)> {
    let mut quality = start;
    let mut encoded = first;
    while encoded.len() > target && quality > MIN_QUALITY {
        quality -= QUALITY_STEP;
        encoded = encode(quality)?;
    }
    Ok((quality, encoded))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let flattened;
    let img = if img.color().has_alpha() {
        flattened = DynamicImage::ImageRgb8(img.to_rgb8());
        &flattened
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| MediaError::processing(format!("JPEG encoding failed: {e}")))?;
    Ok(buf)
}

fn jpeg_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    ImageReader::with_format(Cursor::new(data), image::ImageFormat::Jpeg)
        .into_dimensions()
        .map_err(|e| MediaError::processing(format!("could not read JPEG header: {e}")))
}
