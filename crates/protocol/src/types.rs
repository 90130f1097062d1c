use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_REQUEST_PAYLOAD_SIZE};

/// Caller-supplied options for creating or resuming an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    /// Creation URL of the tus server.
    pub endpoint: String,
    /// Bytes sent per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum bytes per PATCH request.
    #[serde(default = "default_request_payload_size")]
    pub request_payload_size: usize,
    /// Extra headers sent with every request.
    #[serde(default, deserialize_with = "string_map")]
    pub headers: HashMap<String, String>,
    /// Metadata sent once when the upload is created.
    #[serde(default, deserialize_with = "string_map")]
    pub metadata: HashMap<String, String>,
    /// Send an `Upload-Checksum` header with every PATCH.
    #[serde(default, skip_serializing_if = "is_false")]
    pub checksum: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_request_payload_size() -> usize {
    DEFAULT_REQUEST_PAYLOAD_SIZE
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl UploadOptions {
    /// Options for `endpoint` with default sizes and no headers or metadata.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_payload_size: DEFAULT_REQUEST_PAYLOAD_SIZE,
            headers: HashMap::new(),
            metadata: HashMap::new(),
            checksum: false,
        }
    }
}

/// Accepts any JSON scalar as a map value and stores its string form.
fn string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error> {
    let raw: Option<HashMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    let mut out = HashMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let s = match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s,
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "value for {key:?} must be a scalar, got {other}"
                )));
            }
        };
        out.insert(key, s);
    }
    Ok(out)
}

/// Notification delivered to the caller about an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum UploadEvent {
    #[serde(rename = "onProgress", rename_all = "camelCase")]
    Progress {
        upload_id: String,
        bytes_written: u64,
        bytes_total: u64,
    },
    #[serde(rename = "onSuccess", rename_all = "camelCase")]
    Success { upload_id: String, upload_url: String },
    #[serde(rename = "onError", rename_all = "camelCase")]
    Error { upload_id: String, error: String },
}

impl UploadEvent {
    /// Returns the upload this event belongs to.
    pub fn upload_id(&self) -> &str {
        match self {
            Self::Progress { upload_id, .. }
            | Self::Success { upload_id, .. }
            | Self::Error { upload_id, .. } => upload_id,
        }
    }

    /// Returns `true` for `Success` and `Error`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
