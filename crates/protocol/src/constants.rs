use std::time::Duration;

/// Protocol version sent in every `Tus-Resumable` header.
pub const TUS_RESUMABLE: &str = "1.0.0";

// Header names are lowercase, the form `http::HeaderName` stores.

/// Header carrying the protocol version.
pub const HEADER_TUS_RESUMABLE: &str = "tus-resumable";

/// Total upload size, sent once on creation.
pub const HEADER_UPLOAD_LENGTH: &str = "upload-length";

/// Byte offset of a PATCH body, and the server's acknowledged offset.
pub const HEADER_UPLOAD_OFFSET: &str = "upload-offset";

/// Comma separated `key base64(value)` pairs, sent once on creation.
pub const HEADER_UPLOAD_METADATA: &str = "upload-metadata";

/// Checksum extension header: `<algorithm> <base64 digest>`.
pub const HEADER_UPLOAD_CHECKSUM: &str = "upload-checksum";

/// Content type required for PATCH bodies.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Default bytes sent per chunk (2 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Default upper bound for a single PATCH body (10 MiB).
///
/// A chunk larger than this is split into several PATCH requests.
pub const DEFAULT_REQUEST_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Cadence of progress events while a session is transferring.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
