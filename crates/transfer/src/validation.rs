use std::path::PathBuf;

use percent_encoding::percent_decode_str;

use crate::TransferError;

/// Turns a caller-supplied file reference into a local path.
///
/// Accepts plain paths and `file://` URIs (`file:///tmp/a%20b.bin`).
/// Percent escapes are decoded for URIs only. Rejects empty references
/// and URIs naming a remote host.
pub fn resolve_file_ref(file_ref: &str) -> Result<PathBuf, TransferError> {
    let trimmed = file_ref.trim();
    if trimmed.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let Some(rest) = trimmed.strip_prefix("file://") else {
        return Ok(PathBuf::from(trimmed));
    };

    // file://localhost/path is the same as file:///path.
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    if !rest.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "file URI must be local: {file_ref}"
        )));
    }

    let decoded = percent_decode_str(rest)
        .decode_utf8()
        .map_err(|_| TransferError::InvalidPath(format!("invalid UTF-8 in URI: {file_ref}")))?;
    if decoded == "/" {
        return Err(TransferError::InvalidPath(format!(
            "file URI names no file: {file_ref}"
        )));
    }

    Ok(PathBuf::from(decoded.into_owned()))
}
