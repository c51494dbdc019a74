// SPDX-License-Identifier: MPL-2.0

mod image;
mod probe;

pub use self::image::{HeicDecoder, ImageFormat, ImagePreparer, PreparedImage};
pub use self::probe::{FfprobeVideoProbe, VideoMetadata, VideoProbe};
