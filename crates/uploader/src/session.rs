//! One resumable upload and the state machine that drives it.
//!
//! A session is run by at most one worker at a time. The worker holds the
//! session's I/O lock for the whole run; [`UploadSession::finish`] only
//! flips the cancellation flag for an active session and is observed at the
//! next chunk boundary, so a chunk in flight always completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tusclient_http::TusTransport;
use tusclient_protocol::{UploadEvent, encode_metadata};
use tusclient_transfer::{ChunkReader, ProgressCounter, ProgressReporter, ResumeStore, checksum_header};

use crate::error::UploadError;
use crate::types::{SessionState, UploadDescriptor};

/// Shared collaborators handed to every run.
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn TusTransport>,
    pub store: Arc<dyn ResumeStore>,
    pub events_tx: mpsc::Sender<UploadEvent>,
    pub progress_interval: Duration,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every byte was acknowledged.
    Finished { upload_url: String },
    /// Stopped at a chunk boundary on request.
    Paused { offset: u64 },
    Failed(UploadError),
}

impl RunOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Finished { .. } => SessionState::Finished,
            Self::Paused { .. } => SessionState::Paused,
            Self::Failed(_) => SessionState::Failed,
        }
    }

    /// The terminal event for this outcome. Pausing reports nothing.
    pub fn event(&self, upload_id: &str) -> Option<UploadEvent> {
        match self {
            Self::Finished { upload_url } => Some(UploadEvent::Success {
                upload_id: upload_id.to_string(),
                upload_url: upload_url.clone(),
            }),
            Self::Paused { .. } => None,
            Self::Failed(e) => Some(UploadEvent::Error {
                upload_id: upload_id.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

/// A single upload: its descriptor, negotiated URL, offset and state.
pub struct UploadSession {
    upload_id: String,
    descriptor: UploadDescriptor,
    fingerprint: String,
    progress: Arc<ProgressCounter>,
    cancel: AtomicBool,
    state: Mutex<SessionState>,
    upload_url: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
    reader: tokio::sync::Mutex<Option<ChunkReader>>,
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("upload_id", &self.upload_id)
            .field("path", &self.descriptor.path)
            .field("state", &self.state())
            .field("offset", &self.offset())
            .finish_non_exhaustive()
    }
}

impl UploadSession {
    pub fn new(upload_id: impl Into<String>, descriptor: UploadDescriptor) -> Self {
        let fingerprint = descriptor.fingerprint();
        let progress = Arc::new(ProgressCounter::new(descriptor.size));
        Self {
            upload_id: upload_id.into(),
            descriptor,
            fingerprint,
            progress,
            cancel: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
            upload_url: Mutex::new(None),
            last_error: Mutex::new(None),
            reader: tokio::sync::Mutex::new(None),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn descriptor(&self) -> &UploadDescriptor {
        &self.descriptor
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Last offset acknowledged by the server.
    pub fn offset(&self) -> u64 {
        self.progress.offset()
    }

    /// Counter observed by the progress reporter.
    pub fn progress(&self) -> Arc<ProgressCounter> {
        Arc::clone(&self.progress)
    }

    /// Remote upload URL, once negotiated.
    pub fn upload_url(&self) -> Option<String> {
        lock(&self.upload_url).clone()
    }

    /// Message of the error that failed the last run.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Uses `url` as the first resume candidate of the next negotiation.
    pub fn seed_upload_url(&self, url: String) {
        *lock(&self.upload_url) = Some(url);
    }

    /// Moves a submittable session to `Queued` and clears a stale pause
    /// request. Returns the previous state, or the current one on refusal.
    pub fn mark_queued(&self) -> Result<SessionState, SessionState> {
        let mut state = self.lock_state();
        if !state.can_submit() {
            return Err(*state);
        }
        let previous = *state;
        self.cancel.store(false, Ordering::Release);
        *state = SessionState::Queued;
        Ok(previous)
    }

    /// Undoes [`mark_queued`](Self::mark_queued) when the pool refused the job.
    pub fn unmark_queued(&self, previous: SessionState) {
        let mut state = self.lock_state();
        if *state == SessionState::Queued {
            *state = previous;
        }
    }

    /// Asks an active session to stop at the next chunk boundary.
    ///
    /// Returns `false` if the session was not queued or running.
    pub fn request_pause(&self) -> bool {
        let state = self.lock_state();
        if !state.is_active() {
            return false;
        }
        self.cancel.store(true, Ordering::Release);
        true
    }

    /// Stops the session.
    ///
    /// An active session is asked to pause at the next chunk boundary. An
    /// inactive one releases its file handle and, if `immediate`, refreshes
    /// its offset from the server on a best-effort basis.
    pub async fn finish(&self, immediate: bool, transport: &dyn TusTransport) {
        if self.request_pause() {
            debug!(upload_id = %self.upload_id, "pause requested");
            return;
        }

        // A worker picked the session up since the state check.
        let Ok(mut reader) = self.reader.try_lock() else {
            self.cancel.store(true, Ordering::Release);
            return;
        };
        if reader.take().is_some() {
            debug!(upload_id = %self.upload_id, "file handle released");
        }

        if !immediate {
            return;
        }
        let Some(url) = self.upload_url() else {
            return;
        };
        match transport.offset(&url, &self.descriptor.headers).await {
            Ok(remote) => self.progress.set_offset(remote.offset.min(self.descriptor.size)),
            Err(e) => debug!(upload_id = %self.upload_id, error = %e, "offset refresh failed"),
        }
    }

    /// Runs the session to completion, pause or failure.
    ///
    /// Emits progress events while transferring; terminal events are left
    /// to the caller via [`RunOutcome::event`].
    pub async fn run(&self, ctx: &SessionContext) -> RunOutcome {
        let mut reader = self.reader.lock().await;

        if !self.begin() {
            debug!(upload_id = %self.upload_id, "paused before start");
            return RunOutcome::Paused {
                offset: self.offset(),
            };
        }

        let outcome = match self.drive(ctx, &mut reader).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(e),
        };

        match &outcome {
            RunOutcome::Finished { upload_url } => {
                *reader = None;
                if let Err(e) = ctx.store.forget(&self.fingerprint) {
                    warn!(upload_id = %self.upload_id, error = %e, "could not clear resume record");
                }
                info!(upload_id = %self.upload_id, url = %upload_url, bytes = self.descriptor.size, "upload finished");
            }
            RunOutcome::Paused { offset } => {
                info!(upload_id = %self.upload_id, offset, "upload paused");
            }
            RunOutcome::Failed(e) => {
                *reader = None;
                *lock(&self.last_error) = Some(e.to_string());
            }
        }

        *self.lock_state() = outcome.state();
        outcome
    }

    fn begin(&self) -> bool {
        let mut state = self.lock_state();
        if self.cancel.load(Ordering::Acquire) {
            *state = SessionState::Paused;
            return false;
        }
        *state = SessionState::Negotiating;
        *lock(&self.last_error) = None;
        true
    }

    async fn drive(
        &self,
        ctx: &SessionContext,
        slot: &mut Option<ChunkReader>,
    ) -> Result<RunOutcome, UploadError> {
        let reader = match slot.take() {
            Some(reader) => reader,
            None => ChunkReader::open(&self.descriptor.path, self.descriptor.size).await?,
        };
        let reader = slot.insert(reader);

        let url = self.negotiate(ctx).await?;

        self.set_state(SessionState::Transferring);
        let reporter = ProgressReporter::start(
            &self.upload_id,
            Arc::clone(&self.progress),
            ctx.events_tx.clone(),
            ctx.progress_interval,
        );
        let result = self.transfer(ctx, &url, reader).await;
        reporter.stop().await;

        result.map(|completed| {
            if completed {
                RunOutcome::Finished { upload_url: url }
            } else {
                RunOutcome::Paused {
                    offset: self.offset(),
                }
            }
        })
    }

    /// Resumes a known remote upload or creates a new one. Returns its URL.
    async fn negotiate(&self, ctx: &SessionContext) -> Result<String, UploadError> {
        let d = &self.descriptor;

        let known = self.upload_url().or_else(|| match ctx.store.lookup(&self.fingerprint) {
            Ok(url) => url,
            Err(e) => {
                warn!(upload_id = %self.upload_id, error = %e, "resume store lookup failed");
                None
            }
        });

        if let Some(url) = known {
            match ctx.transport.offset(&url, &d.headers).await {
                Ok(remote) => {
                    if remote.offset > d.size {
                        return Err(UploadError::Protocol(format!(
                            "server offset {} exceeds upload size {}",
                            remote.offset, d.size
                        )));
                    }
                    if let Some(length) = remote.length
                        && length != d.size
                    {
                        return Err(UploadError::Protocol(format!(
                            "server upload length {length} does not match file size {}",
                            d.size
                        )));
                    }
                    self.progress.set_offset(remote.offset);
                    self.seed_upload_url(url.clone());
                    info!(upload_id = %self.upload_id, url = %url, offset = remote.offset, "resuming upload");
                    return Ok(url);
                }
                Err(e) if e.is_not_found() => {
                    warn!(upload_id = %self.upload_id, url = %url, "remote upload is gone, creating a new one");
                    if let Err(e) = ctx.store.forget(&self.fingerprint) {
                        warn!(upload_id = %self.upload_id, error = %e, "could not clear resume record");
                    }
                    *lock(&self.upload_url) = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let metadata =
            encode_metadata(&d.metadata).map_err(|e| UploadError::InvalidOptions(e.to_string()))?;
        let url = ctx
            .transport
            .create(&d.endpoint, d.size, metadata.as_deref(), &d.headers)
            .await?;
        if let Err(e) = ctx.store.save(&self.fingerprint, &url) {
            warn!(upload_id = %self.upload_id, error = %e, "could not save resume record");
        }
        self.progress.set_offset(0);
        self.seed_upload_url(url.clone());
        info!(upload_id = %self.upload_id, url = %url, size = d.size, "upload created");
        Ok(url)
    }

    /// Sends chunks until every byte is acknowledged (`true`) or a pause is
    /// observed at a chunk boundary (`false`).
    async fn transfer(
        &self,
        ctx: &SessionContext,
        url: &str,
        reader: &mut ChunkReader,
    ) -> Result<bool, UploadError> {
        let d = &self.descriptor;
        let mut offset = self.progress.offset();

        loop {
            if offset >= d.size {
                return Ok(true);
            }
            if self.cancel.load(Ordering::Acquire) {
                return Ok(false);
            }

            // A chunk larger than the payload limit goes out as several PATCHes.
            let chunk_end = offset.saturating_add(d.chunk_size as u64).min(d.size);
            while offset < chunk_end {
                let len = (chunk_end - offset).min(d.request_payload_size as u64) as usize;
                let data = reader.read_at(offset, len).await?;
                let checksum = d.checksum.then(|| checksum_header(&data));

                let acked = ctx
                    .transport
                    .patch(url, offset, data, checksum, &d.headers)
                    .await?;
                let expected = offset + len as u64;
                if acked != expected {
                    return Err(UploadError::Protocol(format!(
                        "server acknowledged offset {acked}, expected {expected}"
                    )));
                }
                offset = acked;
                self.progress.set_offset(offset);
            }
            debug!(upload_id = %self.upload_id, offset, total = d.size, "chunk acknowledged");
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.lock_state() = state;
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
