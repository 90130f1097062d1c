use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Builds an `Upload-Checksum` header value (`sha256 <base64 digest>`).
pub fn checksum_header(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("sha256 {}", STANDARD.encode(digest))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads byte ranges of the upload file at absolute offsets.
///
/// The file is only opened when a run starts, so a descriptor can outlive
/// the handle. Offsets come from the server, never from a read cursor.
pub struct ChunkReader {
    file: tokio::fs::File,
    path: PathBuf,
    size: u64,
}

impl ChunkReader {
    /// Opens `path` and checks it still holds at least `expected_size` bytes.
    pub async fn open(path: &Path, expected_size: u64) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        if size < expected_size {
            return Err(TransferError::Truncated {
                path: path.display().to_string(),
                expected: expected_size,
                actual: size,
            });
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
        let end = offset + len as u64;
        if end > self.size {
            return Err(TransferError::Truncated {
                path: self.path.display().to_string(),
                expected: end,
                actual: self.size,
            });
        }

        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        match self.file.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            // Shrunk while the handle was open.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransferError::Truncated {
                    path: self.path.display().to_string(),
                    expected: end,
                    actual: offset,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// File size observed when the reader was opened.
    pub fn file_size(&self) -> u64 {
        self.size
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_header_format() {
        // sha256("abc"), base64-encoded.
        assert_eq!(
            checksum_header(b"abc"),
            "sha256 ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[tokio::test]
    async fn read_at_returns_requested_range() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::open(&path, 10).await.unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.read_at(0, 4).await.unwrap(), b"0123");
        assert_eq!(reader.read_at(6, 4).await.unwrap(), b"6789");
        // Random access, not a cursor.
        assert_eq!(reader.read_at(2, 3).await.unwrap(), b"234");
    }

    #[tokio::test]
    async fn read_past_end_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::open(&path, 10).await.unwrap();
        let err = reader.read_at(8, 4).await.unwrap_err();
        assert!(matches!(err, TransferError::Truncated { expected: 12, .. }));
    }

    #[tokio::test]
    async fn open_rejects_shrunk_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"short");

        let err = ChunkReader::open(&path, 100).await.err().unwrap();
        assert!(matches!(
            err,
            TransferError::Truncated {
                expected: 100,
                actual: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn open_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = ChunkReader::open(&dir.path().join("nope"), 1).await.err().unwrap();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
