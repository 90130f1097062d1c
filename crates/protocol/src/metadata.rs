//! `Upload-Metadata` header encoding.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};

/// Errors from metadata encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata key is empty")]
    EmptyKey,

    #[error("metadata key {0:?} contains a space or comma")]
    InvalidKey(String),
}

/// Checks that a metadata key can be carried in the header.
pub fn validate_key(key: &str) -> Result<(), MetadataError> {
    if key.is_empty() {
        return Err(MetadataError::EmptyKey);
    }
    if key.contains([' ', ',']) {
        return Err(MetadataError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Encodes metadata as `key base64(value)` pairs joined by `,`.
///
/// Keys are sorted so the header is stable across runs. Returns `None`
/// for an empty map (the header is then omitted).
pub fn encode_metadata(metadata: &HashMap<String, String>) -> Result<Option<String>, MetadataError> {
    if metadata.is_empty() {
        return Ok(None);
    }

    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();

    let mut pairs = Vec::with_capacity(keys.len());
    for key in keys {
        validate_key(key)?;
        let value = &metadata[key];
        if value.is_empty() {
            pairs.push(key.clone());
        } else {
            pairs.push(format!("{key} {}", STANDARD.encode(value.as_bytes())));
        }
    }

    Ok(Some(pairs.join(",")))
}
