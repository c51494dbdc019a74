// SPDX-License-Identifier: MPL-2.0

//! Video upload state machine.
//!
//! One manager drives at most one video upload at a time:
//! validate → authorize → check quota → upload → poll until terminal.
//! Observers read [`UploadSnapshot`]s from a watch channel; only the manager
//! writes to it. Cancellation goes through a [`CancellationToken`] that every
//! network call and state transition checks, so nothing an abandoned request
//! returns can reach the published state.

use crate::atproto::{
    AspectRatio, AtprotoClient, BlobRpc, ClientError, MediaBlob, VIDEO_EMBED_TYPE, VideoEmbed,
};
use crate::config::{
    GET_UPLOAD_LIMITS_NSID, MAX_CONSECUTIVE_POLL_ERRORS, MAX_POLL_ATTEMPTS, MAX_VIDEO_BYTES,
    POLL_INTERVAL, SERVICE_AUTH_LIFETIME, UPLOAD_BLOB_NSID, UPLOAD_NAME_LEN, VIDEO_SERVICE_DID,
};
use crate::error::{MediaError, Result};
use crate::media::{FfprobeVideoProbe, ImagePreparer, PreparedImage, VideoMetadata, VideoProbe};
use crate::runtime;
use crate::upload::service::{ErrorBody, JobPhase, UploadLimits, VideoEndpoints, parse_job_status};
use crate::upload::status::{UploadSnapshot, UploadStatus};
use crate::upload::transport::{ReqwestTransport, VideoTransport};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MediaUploadManager {
    rpc: Arc<dyn BlobRpc>,
    transport: Arc<dyn VideoTransport>,
    probe: Arc<dyn VideoProbe>,
    endpoints: VideoEndpoints,
    images: ImagePreparer,
    state: watch::Sender<UploadSnapshot>,
    active: Mutex<Option<(u64, CancellationToken)>>,
    next_upload_id: AtomicU64,
}

/// Releases the active-upload slot when the upload future finishes or is dropped.
/// A future dropped mid-flight leaves its upload `Cancelled`.
struct ActiveUpload<'a> {
    slot: &'a Mutex<Option<(u64, CancellationToken)>>,
    state: &'a watch::Sender<UploadSnapshot>,
    id: u64,
    token: CancellationToken,
}

impl Drop for ActiveUpload<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(slot.as_ref(), Some((id, _)) if *id == self.id) {
            return;
        }
        // Still holding the slot, so no other upload can have published yet.
        let abandoned = self.state.send_if_modified(|snapshot| {
            if !snapshot.status.is_active() {
                return false;
            }
            self.token.cancel();
            *snapshot = UploadSnapshot {
                status: UploadStatus::Cancelled,
                job_id: None,
                blob: None,
            };
            true
        });
        *slot = None;
        if abandoned {
            info!("video upload dropped before finishing");
        }
    }
}

impl MediaUploadManager {
    pub fn new(
        rpc: Arc<dyn BlobRpc>,
        transport: Arc<dyn VideoTransport>,
        probe: Arc<dyn VideoProbe>,
    ) -> Self {
        let (state, _) = watch::channel(UploadSnapshot::default());
        Self {
            rpc,
            transport,
            probe,
            endpoints: VideoEndpoints::default(),
            images: ImagePreparer::new(),
            state,
            active: Mutex::new(None),
            next_upload_id: AtomicU64::new(1),
        }
    }

    /// Production wiring: atrium client, reqwest transport, ffprobe.
    pub fn for_client(client: Arc<AtprotoClient>) -> Self {
        Self::new(
            client,
            Arc::new(ReqwestTransport::new()),
            Arc::new(FfprobeVideoProbe::default()),
        )
    }

    pub fn with_endpoints(mut self, endpoints: VideoEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_image_preparer(mut self, images: ImagePreparer) -> Self {
        self.images = images;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> UploadStatus {
        self.state.borrow().status.clone()
    }

    pub fn is_uploading(&self) -> bool {
        self.lock_active().is_some()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<ActiveUpload<'_>> {
        let mut slot = self.lock_active();
        if slot.is_some() {
            return Err(MediaError::UploadInProgress);
        }
        let id = self.next_upload_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *slot = Some((id, token.clone()));
        Ok(ActiveUpload {
            slot: &self.active,
            state: &self.state,
            id,
            token,
        })
    }

    /// Apply `update` unless the upload behind `token` has been cancelled.
    /// The check runs under the channel's write lock, so it can't interleave
    /// with [`cancel`](Self::cancel).
    fn publish(
        &self,
        token: &CancellationToken,
        update: impl FnOnce(&mut UploadSnapshot),
    ) -> Result<()> {
        let mut cancelled = false;
        self.state.send_if_modified(|snapshot| {
            if token.is_cancelled() {
                cancelled = true;
                return false;
            }
            update(snapshot);
            true
        });
        if cancelled {
            Err(MediaError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Check that a local video is something the service will accept.
    /// Runs entirely offline.
    pub async fn validate_video(&self, path: &Path) -> Result<(u64, VideoMetadata)> {
        let file = tokio::fs::metadata(path).await.map_err(|_| {
            MediaError::processing(format!("video file not found: {}", path.display()))
        })?;
        if !file.is_file() {
            return Err(MediaError::processing(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if file.len() > MAX_VIDEO_BYTES {
            return Err(MediaError::processing(format!(
                "video is {} MB, maximum is {} MB",
                file.len() / (1024 * 1024),
                MAX_VIDEO_BYTES / (1024 * 1024)
            )));
        }

        let metadata = self.probe.probe(path).await?;
        metadata.check_limits()?;
        Ok((file.len(), metadata))
    }

    /// Upload a video and wait for the service to finish transcoding it.
    ///
    /// Fails with [`MediaError::UploadInProgress`] while another upload is
    /// active. Any failure after validation leaves the status at
    /// [`UploadStatus::Failed`] with the same reason as the returned error.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload_video(&self, path: &Path) -> Result<MediaBlob> {
        let active = self.begin()?;
        let (len, metadata) = self.validate_video(path).await?;
        debug!(len, duration = ?metadata.duration, "video validated");

        let token = active.token.clone();
        self.publish(&token, |snapshot| {
            *snapshot = UploadSnapshot {
                status: UploadStatus::Uploading(0.0),
                job_id: None,
                blob: None,
            };
        })?;

        let result = self.run_upload(path, len, &token).await;
        if let Err(err) = &result
            && *err != MediaError::Cancelled
        {
            warn!(error = %err, "video upload failed");
            let reason = err.reason();
            // Err here means a cancel won the race; Cancelled already shows.
            let _ = self.publish(&token, |snapshot| {
                snapshot.status = UploadStatus::Failed(reason);
            });
        }
        drop(active);
        result
    }

    /// Run [`upload_video`](Self::upload_video) on the shared runtime.
    pub fn spawn_video_upload(self: &Arc<Self>, path: PathBuf) -> JoinHandle<Result<MediaBlob>> {
        let manager = Arc::clone(self);
        runtime::spawn(async move { manager.upload_video(&path).await })
    }

    /// Abandon the active upload. Returns `false` if nothing was running.
    ///
    /// No request is sent to the service; it has no way to cancel a job.
    pub fn cancel(&self) -> bool {
        let Some((_, token)) = self.lock_active().take() else {
            return false;
        };
        self.state.send_modify(|snapshot| {
            token.cancel();
            *snapshot = UploadSnapshot {
                status: UploadStatus::Cancelled,
                job_id: None,
                blob: None,
            };
        });
        info!("video upload cancelled");
        true
    }

    /// Return to `NotStarted`. Ignored while an upload is active.
    pub fn reset(&self) -> bool {
        if self.is_uploading() {
            return false;
        }
        self.state.send_replace(UploadSnapshot::default());
        true
    }

    async fn run_upload(&self, path: &Path, len: u64, token: &CancellationToken) -> Result<MediaBlob> {
        let did = until_cancelled(token, self.rpc.account_did())
            .await?
            .map_err(MediaError::from)?;

        let limits_token = self
            .service_token(token, VIDEO_SERVICE_DID, GET_UPLOAD_LIMITS_NSID)
            .await?;
        let pds = until_cancelled(token, self.rpc.pds_audience())
            .await?
            .map_err(auth_error)?;
        let upload_token = self.service_token(token, &pds, UPLOAD_BLOB_NSID).await?;

        self.check_upload_limits(&limits_token, token).await?;

        let job_id = self
            .send_video(path, len, &did, &upload_token, token)
            .await?;
        self.publish(token, |snapshot| {
            snapshot.job_id = Some(job_id.clone());
            snapshot.status = UploadStatus::Processing(0.0);
        })?;

        self.poll_job(&job_id, &upload_token, token).await
    }

    async fn service_token(
        &self,
        token: &CancellationToken,
        audience: &str,
        lexicon_method: &str,
    ) -> Result<String> {
        until_cancelled(
            token,
            self.rpc
                .get_service_auth(audience, SERVICE_AUTH_LIFETIME, lexicon_method),
        )
        .await?
        .map_err(auth_error)
    }

    async fn check_upload_limits(&self, bearer: &str, token: &CancellationToken) -> Result<()> {
        let url = self.endpoints.upload_limits()?;
        let response = until_cancelled(token, self.transport.get(url, bearer))
            .await?
            .map_err(|e| MediaError::processing(format!("upload limits check failed: {e}")))?;

        if !response.is_ok() {
            let reason = ErrorBody::parse(&response.body).reason(response.status);
            return Err(MediaError::processing(format!(
                "upload limits check failed: {reason}"
            )));
        }

        let limits: UploadLimits = serde_json::from_slice(&response.body)
            .map_err(|e| MediaError::processing(format!("malformed upload limits: {e}")))?;
        if !limits.can_upload {
            return Err(MediaError::processing(limits.denial_reason()));
        }

        debug!(
            remaining_videos = ?limits.remaining_daily_videos,
            remaining_bytes = ?limits.remaining_daily_bytes,
            "video upload allowed"
        );
        Ok(())
    }

    /// POST the file, returning the job id to poll.
    async fn send_video(
        &self,
        path: &Path,
        len: u64,
        did: &str,
        bearer: &str,
        token: &CancellationToken,
    ) -> Result<String> {
        let name = random_upload_name();
        let url = self.endpoints.upload_video(did, &name)?;
        info!(%name, len, "uploading video");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let upload = self
            .transport
            .post_file(url, bearer, "video/mp4", path, len, progress_tx);
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(MediaError::Cancelled),
                result = &mut upload => break result,
                Some(progress) = progress_rx.recv() => {
                    self.publish(token, |snapshot| {
                        snapshot.status = UploadStatus::Uploading(progress.fraction());
                    })?;
                }
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            self.publish(token, |snapshot| {
                snapshot.status = UploadStatus::Uploading(progress.fraction());
            })?;
        }

        let response = result.map_err(|e| MediaError::upload(e.to_string()))?;
        match response.status {
            200 => {
                let job = parse_job_status(&response.body)
                    .map_err(|e| MediaError::processing(format!("malformed upload response: {e}")))?;
                info!(job_id = %job.job_id, "video accepted");
                Ok(job.job_id)
            }
            409 => {
                let body = ErrorBody::parse(&response.body);
                match body.job_id {
                    Some(job_id) => {
                        info!(%job_id, "video already uploaded, reusing job");
                        Ok(job_id)
                    }
                    None => Err(MediaError::upload(body.reason(409))),
                }
            }
            status => Err(MediaError::upload(ErrorBody::parse(&response.body).reason(status))),
        }
    }

    async fn poll_job(
        &self,
        job_id: &str,
        bearer: &str,
        token: &CancellationToken,
    ) -> Result<MediaBlob> {
        let url = self.endpoints.job_status(job_id)?;
        let mut consecutive_errors = 0;

        for attempt in 1..=MAX_POLL_ATTEMPTS {
            let response = until_cancelled(token, self.transport.get(url.clone(), bearer)).await?;

            match response {
                Ok(response) if response.is_ok() => {
                    consecutive_errors = 0;
                    let job = parse_job_status(&response.body)
                        .map_err(|e| MediaError::processing(format!("malformed job status: {e}")))?;
                    debug!(attempt, state = %job.state, progress = ?job.progress, "job status");

                    match job.phase() {
                        JobPhase::Completed => {
                            let blob = job.blob.ok_or_else(|| {
                                MediaError::processing("job completed without a video blob")
                            })?;
                            let published = blob.clone();
                            self.publish(token, move |snapshot| {
                                snapshot.status = UploadStatus::Complete;
                                snapshot.blob = Some(published);
                            })?;
                            info!(%job_id, cid = %blob.cid(), "video processing complete");
                            return Ok(blob);
                        }
                        JobPhase::Failed => {
                            return Err(MediaError::processing(job.failure_reason()));
                        }
                        JobPhase::Queued => {}
                        JobPhase::Processing => {
                            if let Some(fraction) = job.fraction() {
                                self.publish(token, |snapshot| {
                                    snapshot.status = UploadStatus::Processing(fraction);
                                })?;
                            }
                        }
                    }
                }
                other => {
                    consecutive_errors += 1;
                    let reason = match other {
                        Ok(response) => ErrorBody::parse(&response.body).reason(response.status),
                        Err(e) => e.to_string(),
                    };
                    warn!(attempt, consecutive_errors, %reason, "job status poll failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(MediaError::processing(format!(
                            "could not get job status: {reason}"
                        )));
                    }
                }
            }

            if attempt < MAX_POLL_ATTEMPTS {
                until_cancelled(token, tokio::time::sleep(POLL_INTERVAL)).await?;
            }
        }

        warn!(%job_id, "gave up waiting for video processing");
        Err(MediaError::ProcessingTimeout)
    }

    /// Compress an image and upload it as a blob.
    ///
    /// Compression is CPU-bound; callers on a latency-sensitive thread should
    /// spawn this.
    pub async fn upload_image(&self, data: &[u8]) -> Result<(MediaBlob, PreparedImage)> {
        let prepared = self.images.prepare(data)?;
        let blob = self
            .rpc
            .upload_blob(prepared.data.clone(), "image/jpeg")
            .await
            .map_err(MediaError::from)?;
        debug!(cid = %blob.cid(), size = blob.size, "image uploaded");
        Ok((blob, prepared))
    }

    /// Build the post embed for the uploaded video, if there is one.
    pub fn create_video_embed(
        &self,
        dimensions: Option<(f64, f64)>,
        alt: &str,
    ) -> Option<VideoEmbed> {
        let blob = self.state.borrow().blob.clone()?;
        Some(VideoEmbed {
            embed_type: VIDEO_EMBED_TYPE,
            video: blob,
            aspect_ratio: dimensions.and_then(|(w, h)| AspectRatio::from_size(w, h)),
            alt: (!alt.trim().is_empty()).then(|| alt.to_string()),
        })
    }
}

async fn until_cancelled<F: Future>(token: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MediaError::Cancelled),
        output = future => Ok(output),
    }
}

fn auth_error(err: ClientError) -> MediaError {
    match err {
        ClientError::NotAuthenticated => MediaError::NoClientAvailable,
        other => MediaError::AuthenticationFailed(other.to_string()),
    }
}

fn random_upload_name() -> String {
    let stem: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(UPLOAD_NAME_LEN)
        .map(char::from)
        .collect();
    format!("{stem}.mp4")
}
