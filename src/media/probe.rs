// SPDX-License-Identifier: MPL-2.0

use crate::config::MAX_VIDEO_DURATION;
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// What the upload pipeline needs to know about a local video file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub playable: bool,
    pub has_video_track: bool,
    pub duration: Duration,
    /// Pixel size of the first video track.
    pub dimensions: Option<(u32, u32)>,
}

impl VideoMetadata {
    /// Reject assets the video service would refuse.
    pub fn check_limits(&self) -> Result<()> {
        if !self.playable {
            return Err(MediaError::processing("video is not playable"));
        }
        if !self.has_video_track {
            return Err(MediaError::processing("file contains no video track"));
        }
        if self.duration > MAX_VIDEO_DURATION {
            return Err(MediaError::processing(format!(
                "video is {:.0}s long, maximum is {}s",
                self.duration.as_secs_f64(),
                MAX_VIDEO_DURATION.as_secs()
            )));
        }
        Ok(())
    }
}

/// Platform codec that inspects a video container.
#[async_trait]
pub trait VideoProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoMetadata>;
}

/// Probes with the `ffprobe` binary from FFmpeg.
pub struct FfprobeVideoProbe {
    ffprobe_path: String,
}

impl Default for FfprobeVideoProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeVideoProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl VideoProbe for FfprobeVideoProbe {
    #[tracing::instrument(skip(self), fields(ffprobe = %self.ffprobe_path))]
    async fn probe(&self, path: &Path) -> Result<VideoMetadata> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| MediaError::processing(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            // ffprobe exits non-zero for anything it can't demux
            debug!(status = ?output.status, "ffprobe rejected file");
            return Ok(VideoMetadata {
                playable: false,
                has_video_track: false,
                duration: Duration::ZERO,
                dimensions: None,
            });
        }

        parse_ffprobe_output(&output.stdout)
    }
}

fn parse_ffprobe_output(stdout: &[u8]) -> Result<VideoMetadata> {
    let probe: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::processing(format!("unreadable ffprobe output: {e}")))?;

    let streams = probe["streams"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"));

    let seconds = probe["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            video
                .and_then(|v| v["duration"].as_str())
                .and_then(|d| d.parse::<f64>().ok())
        })
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let dimensions = video.and_then(|v| {
        let width = v["width"].as_u64()? as u32;
        let height = v["height"].as_u64()? as u32;
        Some((width, height))
    });

    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| MediaError::processing(format!("implausible video duration {seconds}: {e}")))?;

    Ok(VideoMetadata {
        playable: seconds > 0.0,
        has_video_track: video.is_some(),
        duration,
        dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(seconds: u64) -> VideoMetadata {
        VideoMetadata {
            playable: true,
            has_video_track: true,
            duration: Duration::from_secs(seconds),
            dimensions: Some((1920, 1080)),
        }
    }

    #[test]
    fn test_duration_boundary() {
        assert!(metadata(180).check_limits().is_ok());
        assert!(matches!(
            metadata(181).check_limits(),
            Err(MediaError::ProcessingFailed(_))
        ));
    }

    #[test]
    fn test_unplayable_and_trackless_rejected() {
        let mut meta = metadata(10);
        meta.playable = false;
        assert!(meta.check_limits().is_err());

        let mut meta = metadata(10);
        meta.has_video_track = false;
        assert!(meta.check_limits().is_err());
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let out = br#"{
            "streams": [
                { "codec_type": "audio", "duration": "59.9" },
                { "codec_type": "video", "width": 1280, "height": 720, "duration": "60.0" }
            ],
            "format": { "duration": "60.021000" }
        }"#;
        let meta = parse_ffprobe_output(out).unwrap();
        assert!(meta.playable);
        assert!(meta.has_video_track);
        assert_eq!(meta.dimensions, Some((1280, 720)));
        assert_eq!(meta.duration.as_secs(), 60);
    }

    #[test]
    fn test_parse_audio_only() {
        let out = br#"{
            "streams": [{ "codec_type": "audio" }],
            "format": { "duration": "12.5" }
        }"#;
        let meta = parse_ffprobe_output(out).unwrap();
        assert!(!meta.has_video_track);
        assert!(meta.check_limits().is_err());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_ffprobe_output(b"not json").is_err());
    }

    #[test]
    fn test_parse_huge_duration_is_error() {
        let out = br#"{
            "streams": [{ "codec_type": "video", "width": 640, "height": 360 }],
            "format": { "duration": "1e30" }
        }"#;
        assert!(matches!(
            parse_ffprobe_output(out),
            Err(MediaError::ProcessingFailed(_))
        ));
    }
}
