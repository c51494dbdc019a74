// SPDX-License-Identifier: MPL-2.0

//! Direct HTTP access to the video service.
//!
//! The manager talks to the service through [`VideoTransport`] so it only ever
//! sees status codes and bodies; [`ReqwestTransport`] is the real thing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Bytes handed to the transport so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub bytes_expected: u64,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.bytes_expected == 0 {
            return 0.0;
        }
        (self.bytes_sent as f64 / self.bytes_expected as f64).clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait VideoTransport: Send + Sync {
    async fn get(&self, url: Url, bearer: &str) -> Result<TransportResponse, TransportError>;

    /// POST the file at `path` as the raw request body, reporting progress on
    /// `progress` as chunks leave.
    async fn post_file(
        &self,
        url: Url,
        bearer: &str,
        content_type: &str,
        path: &Path,
        len: u64,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<TransportResponse, TransportError>;
}

/// Uses the client's default timeouts; a large upload may take a while.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VideoTransport for ReqwestTransport {
    async fn get(&self, url: Url, bearer: &str) -> Result<TransportResponse, TransportError> {
        let response = self.client.get(url).bearer_auth(bearer).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse { status, body })
    }

    async fn post_file(
        &self,
        url: Url,
        bearer: &str,
        content_type: &str,
        path: &Path,
        len: u64,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<TransportResponse, TransportError> {
        let file = File::open(path).await?;
        let stream = ProgressStream::new(ReaderStream::new(file), len, progress);

        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse { status, body })
    }
}

pin_project! {
    /// Counts bytes as the HTTP client pulls them.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        sent: u64,
        expected: u64,
        progress: mpsc::UnboundedSender<UploadProgress>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, expected: u64, progress: mpsc::UnboundedSender<UploadProgress>) -> Self {
        Self {
            inner,
            sent: 0,
            expected,
            progress,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        let polled = this.inner.poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled
            && !chunk.is_empty()
        {
            *this.sent += chunk.len() as u64;
            // receiver gone means nobody is watching, keep uploading
            let _ = this.progress.send(UploadProgress {
                bytes_sent: *this.sent,
                bytes_expected: *this.expected,
            });
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;

    #[test]
    fn test_progress_fraction() {
        let p = UploadProgress {
            bytes_sent: 25,
            bytes_expected: 100,
        };
        assert_eq!(p.fraction(), 0.25);
        let empty = UploadProgress {
            bytes_sent: 0,
            bytes_expected: 0,
        };
        assert_eq!(empty.fraction(), 0.0);
    }

    #[tokio::test]
    async fn test_progress_stream_reports_each_chunk() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcd")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"efghij")),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = ProgressStream::new(futures::stream::iter(chunks), 10, tx);
        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 3);

        assert_eq!(rx.recv().await.unwrap().bytes_sent, 4);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.bytes_sent, 10);
        assert_eq!(last.fraction(), 1.0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reqwest_get_sends_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/xrpc/app.bsky.video.getUploadLimits")
            .match_header("authorization", "Bearer limits-token")
            .with_status(200)
            .with_body(r#"{"canUpload":true}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!(
            "{}/xrpc/app.bsky.video.getUploadLimits",
            server.url()
        ))
        .unwrap();
        let response = ReqwestTransport::new().get(url, "limits-token").await.unwrap();

        assert!(response.is_ok());
        assert_eq!(&response.body[..], br#"{"canUpload":true}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_post_file_streams_body() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let payload = vec![7u8; 64 * 1024];
        file.write_all(&payload).unwrap();
        file.flush().unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/xrpc/app.bsky.video.uploadVideo")
            .match_query(mockito::Matcher::UrlEncoded("name".into(), "clip.mp4".into()))
            .match_header("authorization", "Bearer upload-token")
            .match_header("content-type", "video/mp4")
            .match_body(payload.clone())
            .with_status(409)
            .with_body(r#"{"error":"already_exists","jobId":"X"}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!(
            "{}/xrpc/app.bsky.video.uploadVideo?did=did%3Aplc%3Atest&name=clip.mp4",
            server.url()
        ))
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let response = ReqwestTransport::new()
            .post_file(
                url,
                "upload-token",
                "video/mp4",
                file.path(),
                payload.len() as u64,
                tx,
            )
            .await
            .unwrap();

        assert_eq!(response.status, 409);
        mock.assert_async().await;

        let mut last = None;
        while let Ok(p) = rx.try_recv() {
            last = Some(p);
        }
        assert_eq!(
            last,
            Some(UploadProgress {
                bytes_sent: payload.len() as u64,
                bytes_expected: payload.len() as u64,
            })
        );
    }
}
