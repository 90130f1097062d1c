//! Resume store: fingerprint -> remote upload URL.
//!
//! Written after a successful create, read before negotiating, and
//! cleared once the upload finishes so a completed file is never resumed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

/// Errors from resume store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable mapping from upload fingerprint to upload URL.
///
/// Implementations must tolerate concurrent calls from several sessions.
/// Callers treat every error as "no resume information" and carry on.
pub trait ResumeStore: Send + Sync {
    /// Returns the upload URL recorded for `fingerprint`, if any.
    fn lookup(&self, fingerprint: &str) -> Result<Option<String>, StoreError>;

    /// Records `url` for `fingerprint`, replacing any previous entry.
    fn save(&self, fingerprint: &str, url: &str) -> Result<(), StoreError>;

    /// Removes the entry for `fingerprint`. Missing entries are not an error.
    fn forget(&self, fingerprint: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// FileResumeStore
// ---------------------------------------------------------------------------

/// Resume store cached in memory and persisted to a JSON file.
pub struct FileResumeStore {
    path: PathBuf,
    urls: RwLock<HashMap<String, String>>,
}

impl FileResumeStore {
    /// Opens the store at `path`, loading existing entries.
    ///
    /// A missing file starts empty. A corrupt file is logged and replaced
    /// on the next write.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let urls = match load_urls(&path) {
            Ok(urls) => urls,
            Err(StoreError::Json(e)) => {
                warn!(path = %path.display(), error = %e, "resume store unreadable, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            urls: RwLock::new(urls),
        })
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.urls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `urls` to disk through a temporary file.
    ///
    /// Called with the write lock held so concurrent saves land in order.
    fn persist(&self, urls: &HashMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(urls)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} resume record(s) to {:?}", urls.len(), self.path);
        Ok(())
    }
}

impl ResumeStore for FileResumeStore {
    fn lookup(&self, fingerprint: &str) -> Result<Option<String>, StoreError> {
        let urls = self.urls.read().unwrap_or_else(PoisonError::into_inner);
        Ok(urls.get(fingerprint).cloned())
    }

    fn save(&self, fingerprint: &str, url: &str) -> Result<(), StoreError> {
        let mut urls = self.urls.write().unwrap_or_else(PoisonError::into_inner);
        urls.insert(fingerprint.to_string(), url.to_string());
        self.persist(&urls)
    }

    fn forget(&self, fingerprint: &str) -> Result<(), StoreError> {
        let mut urls = self.urls.write().unwrap_or_else(PoisonError::into_inner);
        if urls.remove(fingerprint).is_none() {
            return Ok(());
        }
        self.persist(&urls)
    }
}

/// Loads entries from a JSON file on disk.
fn load_urls(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let urls: HashMap<String, String> = serde_json::from_str(&data)?;
    debug!("loaded {} resume record(s) from {:?}", urls.len(), path);
    Ok(urls)
}

// ---------------------------------------------------------------------------
// MemoryResumeStore
// ---------------------------------------------------------------------------

/// Process-local resume store. Entries are lost on exit.
#[derive(Default)]
pub struct MemoryResumeStore {
    urls: RwLock<HashMap<String, String>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.urls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResumeStore for MemoryResumeStore {
    fn lookup(&self, fingerprint: &str) -> Result<Option<String>, StoreError> {
        let urls = self.urls.read().unwrap_or_else(PoisonError::into_inner);
        Ok(urls.get(fingerprint).cloned())
    }

    fn save(&self, fingerprint: &str, url: &str) -> Result<(), StoreError> {
        let mut urls = self.urls.write().unwrap_or_else(PoisonError::into_inner);
        urls.insert(fingerprint.to_string(), url.to_string());
        Ok(())
    }

    fn forget(&self, fingerprint: &str) -> Result<(), StoreError> {
        let mut urls = self.urls.write().unwrap_or_else(PoisonError::into_inner);
        urls.remove(fingerprint);
        Ok(())
    }
}

/// Returns the default resume store path.
pub fn default_store_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("tusclient").join("resume.json"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_store() -> (tempfile::TempDir, FileResumeStore) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        let store = FileResumeStore::open(path).unwrap();
        (tmp, store)
    }

    #[test]
    fn new_store_empty() {
        let (_tmp, store) = test_store();
        assert!(store.is_empty());
        assert!(store.lookup("fp-1").unwrap().is_none());
    }

    #[test]
    fn save_lookup_forget() {
        let (_tmp, store) = test_store();
        store.save("fp-1", "https://x/files/1").unwrap();
        assert_eq!(store.lookup("fp-1").unwrap().unwrap(), "https://x/files/1");

        store.forget("fp-1").unwrap();
        assert!(store.lookup("fp-1").unwrap().is_none());
        // Forgetting twice is fine.
        store.forget("fp-1").unwrap();
    }

    #[test]
    fn persist_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("resume.json");

        {
            let store = FileResumeStore::open(path.clone()).unwrap();
            store.save("fp-1", "https://x/files/1").unwrap();
            store.save("fp-2", "https://x/files/2").unwrap();
            store.forget("fp-2").unwrap();
        }

        let reopened = FileResumeStore::open(path).unwrap();
        assert_eq!(reopened.lookup("fp-1").unwrap().unwrap(), "https://x/files/1");
        assert!(reopened.lookup("fp-2").unwrap().is_none());
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn overwrite_url() {
        let (_tmp, store) = test_store();
        store.save("fp-1", "https://x/files/old").unwrap();
        store.save("fp-1", "https://x/files/new").unwrap();
        assert_eq!(store.lookup("fp-1").unwrap().unwrap(), "https://x/files/new");
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileResumeStore::open(path.clone()).unwrap();
        assert!(store.is_empty());

        store.save("fp-1", "https://x/files/1").unwrap();
        let reopened = FileResumeStore::open(path).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn concurrent_saves_all_persisted() {
        let (tmp, store) = test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&store);
                std::thread::spawn(move || {
                    s.save(&format!("fp-{i}"), &format!("https://x/files/{i}"))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reopened = FileResumeStore::open(tmp.path().join("resume.json")).unwrap();
        assert_eq!(reopened.len(), 8);
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryResumeStore::new();
        store.save("fp", "https://x/files/1").unwrap();
        assert_eq!(store.len(), 1);
        store.forget("fp").unwrap();
        assert!(store.is_empty());
    }
}
