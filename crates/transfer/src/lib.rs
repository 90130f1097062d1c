//! Local side of a resumable upload: reading the file in chunks, deriving
//! its fingerprint, remembering negotiated upload URLs, and reporting
//! progress while a transfer runs.

mod chunked;
mod fingerprint;
mod progress;
mod store;
mod validation;

pub use chunked::{ChunkReader, checksum_header};
pub use fingerprint::fingerprint;
pub use progress::{ProgressCounter, ProgressReporter, SpeedCalculator};
pub use store::{
    FileResumeStore, MemoryResumeStore, ResumeStore, StoreError, default_store_path,
};
pub use validation::resolve_file_ref;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: file is {actual} bytes, expected at least {expected}")]
    Truncated {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid file reference: {0}")]
    InvalidPath(String),
}
