//! Upload error types.

use tusclient_http::TransportError;
use tusclient_transfer::{StoreError, TransferError};

/// Errors produced while creating or running an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    #[error("file error: {0}")]
    File(#[from] TransferError),

    #[error("resume store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker pool is shut down")]
    PoolClosed,
}

impl From<TransportError> for UploadError {
    fn from(e: TransportError) -> Self {
        if e.is_protocol() {
            Self::Protocol(e.to_string())
        } else {
            Self::Transport(e)
        }
    }
}
