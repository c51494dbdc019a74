// SPDX-License-Identifier: MPL-2.0

//! Endpoints and payloads of the video processing service.

use crate::atproto::MediaBlob;
use crate::config::{
    GET_JOB_STATUS_NSID, GET_UPLOAD_LIMITS_NSID, UPLOAD_VIDEO_NSID, VIDEO_SERVICE_URL,
};
use crate::error::{MediaError, Result};
use serde::Deserialize;
use url::Url;

/// URL builder for the three video service methods.
#[derive(Debug, Clone)]
pub struct VideoEndpoints {
    base: String,
}

impl Default for VideoEndpoints {
    fn default() -> Self {
        Self {
            base: VIDEO_SERVICE_URL.to_string(),
        }
    }
}

impl VideoEndpoints {
    /// `base` is the XRPC root, e.g. `https://video.bsky.app/xrpc`.
    pub fn new(base: &str) -> Result<Self> {
        Url::parse(base)
            .map_err(|e| MediaError::processing(format!("invalid video service URL: {e}")))?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn method(&self, nsid: &str) -> Result<Url> {
        Url::parse(&format!("{}/{nsid}", self.base))
            .map_err(|e| MediaError::processing(format!("invalid video service URL: {e}")))
    }

    pub fn upload_limits(&self) -> Result<Url> {
        self.method(GET_UPLOAD_LIMITS_NSID)
    }

    pub fn upload_video(&self, did: &str, name: &str) -> Result<Url> {
        let mut url = self.method(UPLOAD_VIDEO_NSID)?;
        url.query_pairs_mut()
            .append_pair("did", did)
            .append_pair("name", name);
        Ok(url)
    }

    pub fn job_status(&self, job_id: &str) -> Result<Url> {
        let mut url = self.method(GET_JOB_STATUS_NSID)?;
        url.query_pairs_mut().append_pair("jobId", job_id);
        Ok(url)
    }
}

/// `app.bsky.video.getUploadLimits` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLimits {
    pub can_upload: bool,
    pub remaining_daily_videos: Option<i64>,
    pub remaining_daily_bytes: Option<i64>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl UploadLimits {
    pub fn denial_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "video uploads are not allowed for this account".to_string())
    }
}

/// `app.bsky.video.defs#jobStatus`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub did: Option<String>,
    pub state: String,
    /// Percentage, 0..=100.
    pub progress: Option<f64>,
    pub blob: Option<MediaBlob>,
    pub error: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusEnvelope {
    job_status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn phase(&self) -> JobPhase {
        match self.state.as_str() {
            "JOB_STATE_COMPLETED" => JobPhase::Completed,
            "JOB_STATE_FAILED" => JobPhase::Failed,
            "queued" | "JOB_STATE_CREATED" => JobPhase::Queued,
            _ => JobPhase::Processing,
        }
    }

    /// Server progress as a 0..=1 fraction.
    pub fn fraction(&self) -> Option<f64> {
        self.progress.map(|p| (p / 100.0).clamp(0.0, 1.0))
    }

    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "video processing failed".to_string())
    }
}

/// Job status bodies come wrapped in `{"jobStatus": ...}`; accept bare ones too.
pub fn parse_job_status(body: &[u8]) -> std::result::Result<JobStatus, serde_json::Error> {
    match serde_json::from_slice::<JobStatusEnvelope>(body) {
        Ok(envelope) => Ok(envelope.job_status),
        Err(_) => serde_json::from_slice::<JobStatus>(body),
    }
}

/// XRPC error body. A 409 from `uploadVideo` also names the existing job.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub job_id: Option<String>,
}

impl ErrorBody {
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// Human-readable reason, falling back to the HTTP status.
    pub fn reason(&self, status: u16) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| format!("HTTP {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let endpoints = VideoEndpoints::default();
        assert_eq!(
            endpoints.upload_limits().unwrap().as_str(),
            "https://video.bsky.app/xrpc/app.bsky.video.getUploadLimits"
        );
        assert_eq!(
            endpoints
                .upload_video("did:plc:abc123", "Xy12Ab34Cd56.mp4")
                .unwrap()
                .as_str(),
            "https://video.bsky.app/xrpc/app.bsky.video.uploadVideo?did=did%3Aplc%3Aabc123&name=Xy12Ab34Cd56.mp4"
        );
        assert_eq!(
            endpoints.job_status("job-1").unwrap().as_str(),
            "https://video.bsky.app/xrpc/app.bsky.video.getJobStatus?jobId=job-1"
        );
    }

    #[test]
    fn test_trailing_slash_base() {
        let endpoints = VideoEndpoints::new("http://127.0.0.1:1234/xrpc/").unwrap();
        assert_eq!(
            endpoints.upload_limits().unwrap().as_str(),
            "http://127.0.0.1:1234/xrpc/app.bsky.video.getUploadLimits"
        );
        assert!(VideoEndpoints::new("not a url").is_err());
    }

    #[test]
    fn test_parse_wrapped_and_bare_job_status() {
        let wrapped = br#"{"jobStatus":{"jobId":"abc","did":"did:plc:x","state":"JOB_STATE_ENCODING","progress":42}}"#;
        let job = parse_job_status(wrapped).unwrap();
        assert_eq!(job.job_id, "abc");
        assert_eq!(job.phase(), JobPhase::Processing);
        assert_eq!(job.fraction(), Some(0.42));

        let bare = br#"{"jobId":"def","state":"queued"}"#;
        let job = parse_job_status(bare).unwrap();
        assert_eq!(job.job_id, "def");
        assert_eq!(job.phase(), JobPhase::Queued);
        assert_eq!(job.fraction(), None);

        assert!(parse_job_status(b"{}").is_err());
    }

    #[test]
    fn test_completed_job_carries_blob() {
        let body = br#"{"jobStatus":{"jobId":"abc","state":"JOB_STATE_COMPLETED","blob":{"$type":"blob","ref":{"$link":"bafkreivid"},"mimeType":"video/mp4","size":5000}}}"#;
        let job = parse_job_status(body).unwrap();
        assert_eq!(job.phase(), JobPhase::Completed);
        assert_eq!(job.blob, Some(MediaBlob::new("bafkreivid", "video/mp4", 5000)));
    }

    #[test]
    fn test_error_body_reason() {
        let body = ErrorBody::parse(br#"{"error":"already_exists","message":"Video already processed","jobId":"X"}"#);
        assert_eq!(body.job_id.as_deref(), Some("X"));
        assert_eq!(body.reason(409), "Video already processed");

        let body = ErrorBody::parse(b"<html>bad gateway</html>");
        assert_eq!(body.reason(502), "HTTP 502");
    }

    #[test]
    fn test_upload_limits_denial_reason() {
        let limits: UploadLimits =
            serde_json::from_str(r#"{"canUpload":false,"error":"daily limit reached"}"#).unwrap();
        assert!(!limits.can_upload);
        assert_eq!(limits.denial_reason(), "daily limit reached");

        let limits: UploadLimits = serde_json::from_str(r#"{"canUpload":false}"#).unwrap();
        assert_eq!(
            limits.denial_reason(),
            "video uploads are not allowed for this account"
        );
    }
}
