use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use tusclient_http::Url;
use tusclient_protocol::{UploadOptions, encode_metadata};
use tusclient_transfer::{fingerprint, resolve_file_ref};

use crate::error::UploadError;

/// Lifecycle state of an upload session.
///
/// `Idle → Queued → Negotiating → Transferring → {Finished | Paused | Failed}`.
/// `Paused` and `Failed` sessions may be queued again; `Finished` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Queued,
    Negotiating,
    Transferring,
    Finished,
    Paused,
    Failed,
}

impl SessionState {
    /// Waiting for a worker or running on one.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Negotiating | Self::Transferring)
    }

    /// Running on a worker.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Negotiating | Self::Transferring)
    }

    /// May be handed to the worker pool.
    pub fn can_submit(self) -> bool {
        matches!(self, Self::Idle | Self::Paused | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Negotiating => "negotiating",
            Self::Transferring => "transferring",
            Self::Finished => "finished",
            Self::Paused => "paused",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything needed to upload one file, validated up front.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    /// Canonical path of the local file.
    pub path: PathBuf,
    /// File size at creation time.
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub endpoint: Url,
    pub chunk_size: usize,
    pub request_payload_size: usize,
    pub headers: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub checksum: bool,
}

impl UploadDescriptor {
    /// Validates a file reference (plain path or `file://` URI) and options.
    ///
    /// The file must exist, be a regular file and be readable. The endpoint
    /// must be an absolute `http` or `https` URL.
    pub fn from_options(file_ref: &str, options: &UploadOptions) -> Result<Self, UploadError> {
        let path = resolve_file_ref(file_ref).map_err(|e| UploadError::InvalidFile(e.to_string()))?;
        let path = std::fs::canonicalize(&path)
            .map_err(|e| UploadError::InvalidFile(format!("{}: {e}", path.display())))?;
        let meta = std::fs::metadata(&path)
            .map_err(|e| UploadError::InvalidFile(format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(UploadError::InvalidFile(format!(
                "{}: not a regular file",
                path.display()
            )));
        }
        std::fs::File::open(&path)
            .map_err(|e| UploadError::InvalidFile(format!("{}: {e}", path.display())))?;

        let endpoint = parse_endpoint(&options.endpoint)?;

        if options.chunk_size == 0 {
            return Err(UploadError::InvalidOptions("chunkSize must be positive".into()));
        }
        if options.request_payload_size == 0 {
            return Err(UploadError::InvalidOptions(
                "requestPayloadSize must be positive".into(),
            ));
        }
        encode_metadata(&options.metadata)
            .map_err(|e| UploadError::InvalidOptions(e.to_string()))?;

        Ok(Self {
            path,
            size: meta.len(),
            modified: meta.modified().ok(),
            endpoint,
            chunk_size: options.chunk_size,
            request_payload_size: options.request_payload_size,
            headers: options.headers.clone(),
            metadata: options.metadata.clone(),
            checksum: options.checksum,
        })
    }

    /// Stable identity of this file upload, used as the resume store key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.path, self.size, self.modified, self.endpoint.as_str())
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, UploadError> {
    let url = Url::parse(raw).map_err(|e| UploadError::InvalidEndpoint(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(UploadError::InvalidEndpoint(format!("{raw}: missing host"))),
        other => Err(UploadError::InvalidEndpoint(format!(
            "{raw}: unsupported scheme {other:?}"
        ))),
    }
}
