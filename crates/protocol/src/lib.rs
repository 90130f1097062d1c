//! Wire-level vocabulary shared by the tus client crates.
//!
//! Holds the tus header names and protocol version, the caller-facing
//! upload options, the events delivered back to the caller, and the
//! `Upload-Metadata` encoding.

pub mod constants;
pub mod metadata;
pub mod types;

// Re-export primary types for convenience.
pub use constants::TUS_RESUMABLE;
pub use metadata::{MetadataError, encode_metadata};
pub use types::{UploadEvent, UploadOptions};
