use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Derives the resume-store key for a (file, endpoint) pair.
///
/// Hashes the path, size, last-modified time and endpoint. Any change to
/// one of them yields a different key, so an edited file is never resumed
/// against the remote copy of its previous content.
pub fn fingerprint(path: &Path, size: u64, modified: Option<SystemTime>, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"tus-fp-v1\0");
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(size.to_be_bytes());
    hasher.update(b"\0");
    match modified.and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
        Some(d) => {
            hasher.update(d.as_secs().to_be_bytes());
            hasher.update(d.subsec_nanos().to_be_bytes());
        }
        None => hasher.update(b"-"),
    }
    hasher.update(b"\0");
    hasher.update(endpoint.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ENDPOINT: &str = "https://tus.example.com/files/";

    fn mtime(secs: u64) -> Option<SystemTime> {
        Some(UNIX_EPOCH + Duration::from_secs(secs))
    }

    #[test]
    fn stable_for_same_inputs() {
        let a = fingerprint(Path::new("/data/a.bin"), 1000, mtime(1_700_000_000), ENDPOINT);
        let b = fingerprint(Path::new("/data/a.bin"), 1000, mtime(1_700_000_000), ENDPOINT);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn size_change_changes_fingerprint() {
        let a = fingerprint(Path::new("/data/a.bin"), 1000, mtime(1), ENDPOINT);
        let b = fingerprint(Path::new("/data/a.bin"), 1001, mtime(1), ENDPOINT);
        assert_ne!(a, b);
    }

    #[test]
    fn every_component_participates() {
        let base = fingerprint(Path::new("/data/a.bin"), 1000, mtime(1), ENDPOINT);
        assert_ne!(base, fingerprint(Path::new("/data/b.bin"), 1000, mtime(1), ENDPOINT));
        assert_ne!(base, fingerprint(Path::new("/data/a.bin"), 1000, mtime(2), ENDPOINT));
        assert_ne!(base, fingerprint(Path::new("/data/a.bin"), 1000, None, ENDPOINT));
        assert_ne!(
            base,
            fingerprint(Path::new("/data/a.bin"), 1000, mtime(1), "https://other/files/")
        );
    }
}
