//! tus transport over `reqwest`.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Response, Url};
use tracing::debug;
use tusclient_protocol::TUS_RESUMABLE;
use tusclient_protocol::constants::{
    HEADER_TUS_RESUMABLE, HEADER_UPLOAD_CHECKSUM, HEADER_UPLOAD_LENGTH, HEADER_UPLOAD_METADATA,
    HEADER_UPLOAD_OFFSET, OFFSET_OCTET_STREAM,
};

use crate::error::TransportError;
use crate::transport::{BoxFuture, Headers, RemoteOffset, TusTransport};

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: format!("tusclient/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// tus client transport backed by a shared `reqwest` connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }

    async fn do_create(
        &self,
        endpoint: &Url,
        length: u64,
        metadata: Option<&str>,
        headers: &Headers,
    ) -> Result<String, TransportError> {
        let mut map = tus_headers(headers)?;
        map.insert(HEADER_UPLOAD_LENGTH, HeaderValue::from(length));
        if let Some(metadata) = metadata {
            let value = HeaderValue::from_str(metadata)
                .map_err(|_| TransportError::InvalidRequestHeader(HEADER_UPLOAD_METADATA.into()))?;
            map.insert(HEADER_UPLOAD_METADATA, value);
        }

        let resp = self
            .http
            .post(endpoint.clone())
            .headers(map)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let location = resp
            .headers()
            .get(LOCATION)
            .ok_or(TransportError::MissingHeader("location"))?;
        let location = location.to_str().map_err(|_| TransportError::InvalidHeader {
            name: "location",
            value: String::from_utf8_lossy(location.as_bytes()).into_owned(),
        })?;

        // Servers commonly answer with a path relative to the endpoint.
        let url = endpoint
            .join(location)
            .map_err(|e| TransportError::InvalidUrl(format!("{location}: {e}")))?;
        debug!(endpoint = %endpoint, url = %url, length, "upload created");
        Ok(url.into())
    }

    async fn do_offset(
        &self,
        upload_url: &str,
        headers: &Headers,
    ) -> Result<RemoteOffset, TransportError> {
        let url = parse_url(upload_url)?;
        let resp = self
            .http
            .head(url)
            .headers(tus_headers(headers)?)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let offset = parse_u64_header(resp.headers(), HEADER_UPLOAD_OFFSET)?
            .ok_or(TransportError::MissingHeader(HEADER_UPLOAD_OFFSET))?;
        let length = parse_u64_header(resp.headers(), HEADER_UPLOAD_LENGTH)?;
        debug!(url = %upload_url, offset, ?length, "offset queried");
        Ok(RemoteOffset { offset, length })
    }

    async fn do_patch(
        &self,
        upload_url: &str,
        offset: u64,
        data: Vec<u8>,
        checksum: Option<String>,
        headers: &Headers,
    ) -> Result<u64, TransportError> {
        let url = parse_url(upload_url)?;
        let mut map = tus_headers(headers)?;
        map.insert(HEADER_UPLOAD_OFFSET, HeaderValue::from(offset));
        map.insert(CONTENT_TYPE, HeaderValue::from_static(OFFSET_OCTET_STREAM));
        if let Some(checksum) = checksum {
            let value = HeaderValue::from_str(&checksum)
                .map_err(|_| TransportError::InvalidRequestHeader(HEADER_UPLOAD_CHECKSUM.into()))?;
            map.insert(HEADER_UPLOAD_CHECKSUM, value);
        }

        let len = data.len();
        let resp = self
            .http
            .patch(url)
            .headers(map)
            .body(data)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let new_offset = parse_u64_header(resp.headers(), HEADER_UPLOAD_OFFSET)?
            .ok_or(TransportError::MissingHeader(HEADER_UPLOAD_OFFSET))?;
        debug!(url = %upload_url, offset, len, new_offset, "chunk acknowledged");
        Ok(new_offset)
    }
}

impl TusTransport for HttpTransport {
    fn create<'a>(
        &'a self,
        endpoint: &'a Url,
        length: u64,
        metadata: Option<&'a str>,
        headers: &'a Headers,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(self.do_create(endpoint, length, metadata, headers))
    }

    fn offset<'a>(
        &'a self,
        upload_url: &'a str,
        headers: &'a Headers,
    ) -> BoxFuture<'a, Result<RemoteOffset, TransportError>> {
        Box::pin(self.do_offset(upload_url, headers))
    }

    fn patch<'a>(
        &'a self,
        upload_url: &'a str,
        offset: u64,
        data: Vec<u8>,
        checksum: Option<String>,
        headers: &'a Headers,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(self.do_patch(upload_url, offset, data, checksum, headers))
    }
}

/// Caller headers plus `Tus-Resumable`, which the caller cannot override.
fn tus_headers(headers: &Headers) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len() + 4);
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidRequestHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidRequestHeader(name.as_str().to_string()))?;
        map.insert(name, value);
    }
    map.insert(HEADER_TUS_RESUMABLE, HeaderValue::from_static(TUS_RESUMABLE));
    Ok(map)
}

fn parse_url(upload_url: &str) -> Result<Url, TransportError> {
    Url::parse(upload_url).map_err(|e| TransportError::InvalidUrl(format!("{upload_url}: {e}")))
}

/// Maps a non-success response to [`TransportError::Status`].
async fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

fn parse_u64_header(headers: &HeaderMap, name: &'static str) -> Result<Option<u64>, TransportError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let invalid = || TransportError::InvalidHeader {
        name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    };
    let text = value.to_str().map_err(|_| invalid())?;
    text.trim().parse::<u64>().map(Some).map_err(|_| invalid())
}
