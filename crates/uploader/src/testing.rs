//! In-memory tus server for session and registry tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tusclient_http::{BoxFuture, Headers, RemoteOffset, TransportError, TusTransport, Url};
use tusclient_protocol::UploadEvent;

type PatchHook = Box<dyn Fn(&str, u64) + Send + Sync>;

/// One PATCH as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCall {
    pub url: String,
    pub offset: u64,
    pub len: usize,
    pub checksum: Option<String>,
}

#[derive(Default)]
struct Upload {
    length: u64,
    data: Vec<u8>,
    metadata: Option<String>,
}

#[derive(Default)]
pub struct MockServer {
    uploads: Mutex<HashMap<String, Upload>>,
    patches: Mutex<Vec<PatchCall>>,
    next_id: AtomicUsize,
    creates: AtomicUsize,
    offset_queries: AtomicUsize,
    fail_patch_at: Mutex<Option<u64>>,
    patch_hook: Mutex<Option<PatchHook>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs `hook(url, new_offset)` after every accepted PATCH.
    pub fn on_patch(&self, hook: impl Fn(&str, u64) + Send + Sync + 'static) {
        *self.patch_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Answers the next PATCH at `offset` with a 500.
    pub fn fail_patch_at(&self, offset: u64) {
        *self.fail_patch_at.lock().unwrap() = Some(offset);
    }

    /// Forgets an upload so later requests get 404.
    pub fn drop_upload(&self, url: &str) {
        self.uploads.lock().unwrap().remove(url);
    }

    pub fn data(&self, url: &str) -> Option<Vec<u8>> {
        self.uploads.lock().unwrap().get(url).map(|u| u.data.clone())
    }

    pub fn metadata(&self, url: &str) -> Option<String> {
        self.uploads.lock().unwrap().get(url).and_then(|u| u.metadata.clone())
    }

    pub fn patches(&self) -> Vec<PatchCall> {
        self.patches.lock().unwrap().clone()
    }

    pub fn clear_patches(&self) {
        self.patches.lock().unwrap().clear();
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn offset_queries(&self) -> usize {
        self.offset_queries.load(Ordering::SeqCst)
    }
}

fn not_found() -> TransportError {
    TransportError::Status {
        status: 404,
        body: "upload not found".into(),
    }
}

impl TusTransport for MockServer {
    fn create<'a>(
        &'a self,
        endpoint: &'a Url,
        length: u64,
        metadata: Option<&'a str>,
        _headers: &'a Headers,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.creates.fetch_add(1, Ordering::SeqCst);
            let url = format!("{endpoint}upload-{id}");
            self.uploads.lock().unwrap().insert(
                url.clone(),
                Upload {
                    length,
                    data: Vec::new(),
                    metadata: metadata.map(str::to_string),
                },
            );
            Ok(url)
        })
    }

    fn offset<'a>(
        &'a self,
        upload_url: &'a str,
        _headers: &'a Headers,
    ) -> BoxFuture<'a, Result<RemoteOffset, TransportError>> {
        Box::pin(async move {
            self.offset_queries.fetch_add(1, Ordering::SeqCst);
            let uploads = self.uploads.lock().unwrap();
            let upload = uploads.get(upload_url).ok_or_else(not_found)?;
            Ok(RemoteOffset {
                offset: upload.data.len() as u64,
                length: Some(upload.length),
            })
        })
    }

    fn patch<'a>(
        &'a self,
        upload_url: &'a str,
        offset: u64,
        data: Vec<u8>,
        checksum: Option<String>,
        _headers: &'a Headers,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move {
            if self.fail_patch_at.lock().unwrap().take_if(|at| *at == offset).is_some() {
                return Err(TransportError::Status {
                    status: 500,
                    body: "injected failure".into(),
                });
            }

            self.patches.lock().unwrap().push(PatchCall {
                url: upload_url.to_string(),
                offset,
                len: data.len(),
                checksum,
            });

            let new_offset = {
                let mut uploads = self.uploads.lock().unwrap();
                let upload = uploads.get_mut(upload_url).ok_or_else(not_found)?;
                if upload.data.len() as u64 != offset {
                    return Err(TransportError::Status {
                        status: 409,
                        body: format!("offset is {}", upload.data.len()),
                    });
                }
                upload.data.extend_from_slice(&data);
                upload.data.len() as u64
            };

            if let Some(hook) = self.patch_hook.lock().unwrap().as_ref() {
                hook(upload_url, new_offset);
            }
            Ok(new_offset)
        })
    }
}

/// Receives events until `upload_id` reports success or failure.
pub async fn events_until_terminal(
    rx: &mut tokio::sync::mpsc::Receiver<UploadEvent>,
    upload_id: &str,
) -> Vec<UploadEvent> {
    let mut out = Vec::new();
    let collect = async {
        while let Some(event) = rx.recv().await {
            let done = event.upload_id() == upload_id && event.is_terminal();
            out.push(event);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(10), collect)
        .await
        .expect("timed out waiting for a terminal event");
    out
}

/// File of `len` bytes with a recognisable pattern.
pub fn pattern_file(dir: &std::path::Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}
