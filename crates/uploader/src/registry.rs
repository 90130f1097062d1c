//! Session registry: maps caller-chosen upload ids to sessions and feeds
//! them to the worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tusclient_http::TusTransport;
use tusclient_protocol::constants::PROGRESS_INTERVAL;
use tusclient_protocol::{UploadEvent, UploadOptions};
use tusclient_transfer::ResumeStore;

use crate::error::UploadError;
use crate::pool::{WorkerPool, default_pool_size};
use crate::session::{RunOutcome, SessionContext, UploadSession};
use crate::types::{SessionState, UploadDescriptor};

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Uploads allowed to run at once.
    pub workers: usize,
    pub progress_interval: Duration,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            workers: default_pool_size(),
            progress_interval: PROGRESS_INTERVAL,
            event_capacity: 256,
        }
    }
}

/// Owns every live session and the pool that runs them.
///
/// Cheap to clone; clones share the same sessions and pool. Finished
/// sessions are removed; paused and failed ones stay until resumed.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<String, Arc<UploadSession>>>,
    pool: WorkerPool,
    ctx: SessionContext,
    events_rx: Mutex<Option<mpsc::Receiver<UploadEvent>>>,
}

impl RegistryInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<UploadSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `session` if it is still the one registered under its id.
    fn remove(&self, session: &Arc<UploadSession>) {
        let mut sessions = self.sessions();
        if sessions
            .get(session.upload_id())
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            sessions.remove(session.upload_id());
        }
    }
}

impl SessionRegistry {
    /// Creates a registry and starts its workers. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        transport: Arc<dyn TusTransport>,
        store: Arc<dyn ResumeStore>,
        config: RegistryConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let ctx = SessionContext {
            transport,
            store,
            events_tx,
            progress_interval: config.progress_interval,
        };
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                pool: WorkerPool::new(config.workers),
                ctx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Final progress snapshots and terminal events wait for channel space,
    /// so the receiver must be drained while uploads run.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Validates `file_ref` and `options` and registers an idle session.
    /// Returns its new upload id. Nothing is sent until [`resume`](Self::resume).
    pub fn create(&self, file_ref: &str, options: &UploadOptions) -> Result<String, UploadError> {
        if self.inner.pool.is_closed() {
            return Err(UploadError::PoolClosed);
        }
        let descriptor = UploadDescriptor::from_options(file_ref, options)?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(UploadSession::new(upload_id.clone(), descriptor));
        debug!(upload_id = %upload_id, path = %session.descriptor().path.display(), "session created");
        self.inner.sessions().insert(upload_id.clone(), session);
        Ok(upload_id)
    }

    /// Starts or restarts the upload `upload_id`.
    ///
    /// A registered session ignores `file_ref` and `options`. An unknown or
    /// finished id builds a new session from them, borrowing the upload URL
    /// of an inactive session with the same fingerprint. Returns `false` if
    /// the session could not be queued, including when another session for
    /// the same file is active; resuming an already active session is a
    /// no-op that returns `true`.
    pub fn resume(&self, upload_id: &str, file_ref: &str, options: &UploadOptions) -> bool {
        let session = match self.get(upload_id) {
            Some(session) if session.state() != SessionState::Finished => session,
            // A finished session is gone as soon as its job unregisters it.
            _ => match self.register(upload_id, file_ref, options) {
                Ok(session) => session,
                Err(e) => {
                    warn!(upload_id = %upload_id, error = %e, "cannot resume upload");
                    return false;
                }
            },
        };
        self.submit(session)
    }

    fn register(
        &self,
        upload_id: &str,
        file_ref: &str,
        options: &UploadOptions,
    ) -> Result<Arc<UploadSession>, UploadError> {
        let descriptor = UploadDescriptor::from_options(file_ref, options)?;
        let fresh = Arc::new(UploadSession::new(upload_id, descriptor));

        let mut sessions = self.inner.sessions();
        // Lost a race with another resume of the same id.
        if let Some(existing) = sessions
            .get(upload_id)
            .filter(|s| s.state() != SessionState::Finished)
        {
            return Ok(Arc::clone(existing));
        }
        if let Some(twin) = active_twin(&sessions, &fresh) {
            return Err(UploadError::InvalidOptions(format!(
                "file is already being uploaded as {}",
                twin.upload_id()
            )));
        }
        if let Some(url) = sessions
            .values()
            .filter(|s| s.upload_id() != upload_id && s.fingerprint() == fresh.fingerprint())
            .filter(|s| s.state() != SessionState::Finished)
            .find_map(|s| s.upload_url())
        {
            fresh.seed_upload_url(url);
        }
        sessions.insert(upload_id.to_string(), Arc::clone(&fresh));
        Ok(fresh)
    }

    fn submit(&self, session: Arc<UploadSession>) -> bool {
        // Twin check and queueing share the sessions lock so two submits
        // for one file cannot both pass.
        let previous = {
            let sessions = self.inner.sessions();
            if let Some(twin) = active_twin(&sessions, &session) {
                warn!(
                    upload_id = %session.upload_id(),
                    active = %twin.upload_id(),
                    "file is already being uploaded"
                );
                return false;
            }
            match session.mark_queued() {
                Ok(previous) => previous,
                Err(state) if state.is_active() => {
                    debug!(upload_id = %session.upload_id(), %state, "already active");
                    return true;
                }
                Err(state) => {
                    warn!(upload_id = %session.upload_id(), %state, "session cannot be resumed");
                    return false;
                }
            }
        };

        let registry = Arc::downgrade(&self.inner);
        let ctx = self.inner.ctx.clone();
        let job_session = Arc::clone(&session);
        let job = Box::pin(async move { run_job(job_session, ctx, registry).await });

        if !self.inner.pool.submit(job) {
            session.unmark_queued(previous);
            warn!(upload_id = %session.upload_id(), error = %UploadError::PoolClosed, "cannot resume upload");
            return false;
        }
        debug!(upload_id = %session.upload_id(), "session queued");
        true
    }

    /// Pauses `upload_id` at its next chunk boundary, or releases an idle
    /// session's file handle. Unknown ids and repeated calls are no-ops.
    pub async fn abort(&self, upload_id: &str) {
        let Some(session) = self.get(upload_id) else {
            debug!(upload_id = %upload_id, "abort of unknown upload ignored");
            return;
        };
        session
            .finish(false, self.inner.ctx.transport.as_ref())
            .await;
    }

    pub fn get(&self, upload_id: &str) -> Option<Arc<UploadSession>> {
        self.inner.sessions().get(upload_id).cloned()
    }

    pub fn state(&self, upload_id: &str) -> Option<SessionState> {
        self.get(upload_id).map(|s| s.state())
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions().is_empty()
    }

    /// Pauses every session, then waits for the workers to exit.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.inner.sessions().values().cloned().collect();
        for session in sessions {
            session.request_pause();
        }
        self.inner.pool.shutdown().await;
        info!("upload registry shut down");
    }
}

fn active_twin<'a>(
    sessions: &'a HashMap<String, Arc<UploadSession>>,
    session: &Arc<UploadSession>,
) -> Option<&'a Arc<UploadSession>> {
    sessions.values().find(|other| {
        !Arc::ptr_eq(other, session)
            && other.fingerprint() == session.fingerprint()
            && other.state().is_active()
    })
}

async fn run_job(session: Arc<UploadSession>, ctx: SessionContext, registry: Weak<RegistryInner>) {
    let outcome = session.run(&ctx).await;

    match &outcome {
        RunOutcome::Finished { .. } => {
            if let Some(registry) = registry.upgrade() {
                registry.remove(&session);
            }
        }
        RunOutcome::Failed(e) => {
            error!(upload_id = %session.upload_id(), offset = session.offset(), error = %e, "upload failed");
        }
        RunOutcome::Paused { .. } => {}
    }

    if let Some(event) = outcome.event(session.upload_id()) {
        if ctx.events_tx.send(event).await.is_err() {
            debug!(upload_id = %session.upload_id(), "event receiver dropped");
        }
    }
}
