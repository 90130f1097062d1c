//! Transport error types.

/// Errors produced while talking to a tus server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("invalid {name} header: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("invalid upload URL: {0}")]
    InvalidUrl(String),

    #[error("invalid request header: {0}")]
    InvalidRequestHeader(String),
}

impl TransportError {
    /// HTTP status returned by the server, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The remote upload no longer exists (404 or 410).
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404 | 410))
    }

    /// The server answered but rejected or garbled the exchange, as opposed
    /// to the request never completing.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, Self::Http(_))
    }
}
