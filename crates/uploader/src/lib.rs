//! Resumable tus uploads: sessions, a bounded worker pool and the registry
//! that ties them to caller-chosen upload ids.
//!
//! The crate has no HTTP stack of its own. The registry talks to the server
//! through a [`TusTransport`] and remembers upload URLs through a
//! [`ResumeStore`], so both can be swapped out in tests or by embedders.
//!
//! # Lifecycle
//!
//! 1. **Create** validates the file and options and registers an idle session
//! 2. **Resume** queues the session on the worker pool
//! 3. **Negotiate** resumes a known remote upload or creates a new one
//! 4. **Transfer** sends chunks until complete or paused
//! 5. **Report** emits `onSuccess` or `onError` exactly once per run
//!
//! [`TusTransport`]: tusclient_http::TusTransport
//! [`ResumeStore`]: tusclient_transfer::ResumeStore

pub mod error;
pub mod pool;
pub mod registry;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::UploadError;
pub use pool::{WorkerPool, default_pool_size};
pub use registry::{RegistryConfig, SessionRegistry};
pub use session::{RunOutcome, SessionContext, UploadSession};
pub use types::{SessionState, UploadDescriptor};
