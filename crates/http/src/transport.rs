use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use reqwest::Url;

use crate::error::TransportError;

/// Boxed future returned by [`TusTransport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Extra request headers supplied by the caller.
pub type Headers = HashMap<String, String>;

/// Answer to an offset query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteOffset {
    /// Bytes the server has durably accepted.
    pub offset: u64,
    /// Total size recorded by the server, when it reports one.
    pub length: Option<u64>,
}

/// The three tus exchanges the upload engine needs.
///
/// Implementations own request-level timeouts; the engine imposes none.
pub trait TusTransport: Send + Sync {
    /// Creates a remote upload of `length` bytes and returns its URL.
    fn create<'a>(
        &'a self,
        endpoint: &'a Url,
        length: u64,
        metadata: Option<&'a str>,
        headers: &'a Headers,
    ) -> BoxFuture<'a, Result<String, TransportError>>;

    /// Asks the server how many bytes of `upload_url` it holds.
    fn offset<'a>(
        &'a self,
        upload_url: &'a str,
        headers: &'a Headers,
    ) -> BoxFuture<'a, Result<RemoteOffset, TransportError>>;

    /// Sends `data` at `offset` and returns the server's new offset.
    fn patch<'a>(
        &'a self,
        upload_url: &'a str,
        offset: u64,
        data: Vec<u8>,
        checksum: Option<String>,
        headers: &'a Headers,
    ) -> BoxFuture<'a, Result<u64, TransportError>>;
}
