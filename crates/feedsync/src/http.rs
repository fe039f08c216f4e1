//! HTTP call wrapper.
//!
//! Feed adapters never talk to reqwest directly; they build an
//! [`HttpRequest`] and hand it to an [`HttpTransport`]. One call is one
//! request: the reply body is always read to the end (into memory or into a
//! scratch file) so pooled connections are never left half-consumed. File
//! request bodies are streamed from disk on every send. Attempt loops live in
//! the callers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// The verbs the registry APIs need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// Ordered `(name, value)` pairs; lookups ignore name case.
pub type HttpHeaders = Vec<(String, String)>;

/// Payload of an outgoing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    /// Raw file contents, opened and streamed when the request is sent.
    File(PathBuf),
    /// A `multipart/form-data` form with a single file field. The transport
    /// picks the boundary and sets the content type.
    MultipartFile {
        field: String,
        filename: String,
        path: PathBuf,
    },
}

/// One outgoing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: RequestBody,
    /// Overrides the client-wide timeout for this call.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    /// Stream `path` as the raw request body.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = RequestBody::File(path.into());
        self
    }

    /// Send `path` as the single file field `field` of a multipart form.
    #[must_use]
    pub fn multipart_file(
        mut self,
        field: impl Into<String>,
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.body = RequestBody::MultipartFile {
            field: field.into(),
            filename: filename.into(),
            path: path.into(),
        };
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Status, headers and the fully read body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    /// Body as lossy UTF-8, for log and error messages.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of downloading into a scratch file.
///
/// Only 2xx bodies reach the disk; otherwise `bytes_written` is zero and
/// `sha1` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub bytes_written: u64,
    /// Lowercase hex SHA-1 of what was written.
    pub sha1: Option<String>,
}

impl FileResponse {
    fn not_written(status: u16, headers: HttpHeaders) -> Self {
        Self {
            status,
            headers,
            bytes_written: 0,
            sha1: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection, TLS, DNS or protocol failure.
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Reading an upload or writing a download on disk failed.
    #[error("scratch file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no scripted reply for {method} {url}")]
    Unscripted { method: HttpMethod, url: String },
}

/// The seam between feed adapters and the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue `request` and buffer the whole reply.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;

    /// Issue `request` and stream a 2xx body into `dest`, computing its
    /// SHA-1 on the way. Missing parent directories are created.
    async fn send_to_file(
        &self,
        request: HttpRequest,
        dest: &Path,
    ) -> Result<FileResponse, HttpError>;
}

/// First value of header `name`, ignoring case.
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v.as_str()))
}

/// Hashing file sink shared by transports.
struct ScratchWriter {
    file: tokio::fs::File,
    hasher: Sha1,
    written: u64,
}

impl ScratchWriter {
    async fn create(dest: &Path) -> std::io::Result<Self> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            file: tokio::fs::File::create(dest).await?,
            hasher: Sha1::new(),
            written: 0,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.hasher.update(chunk);
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self, status: u16, headers: HttpHeaders) -> std::io::Result<FileResponse> {
        self.file.flush().await?;
        Ok(FileResponse {
            status,
            headers,
            bytes_written: self.written,
            sha1: Some(format!("{:x}", self.hasher.finalize())),
        })
    }
}

pub mod reqwest_transport {
    use super::*;

    use futures::StreamExt;
    use reqwest::multipart::{Form, Part};
    use tokio_util::io::ReaderStream;

    /// Transport over a shared reqwest connection pool.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        /// Build a client with a default timeout and a `feedsync/<version>`
        /// user agent.
        pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
                .build()
                .map(Self::new)
                .map_err(|e| HttpError::Transport(e.to_string()))
        }

        async fn dispatch(&self, request: HttpRequest) -> Result<reqwest::Response, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            builder = match request.body {
                RequestBody::Empty => builder,
                RequestBody::Bytes(bytes) => builder.body(bytes),
                RequestBody::File(path) => builder.body(stream_file(&path).await?.0),
                RequestBody::MultipartFile {
                    field,
                    filename,
                    path,
                } => {
                    let (body, length) = stream_file(&path).await?;
                    let part = Part::stream_with_length(body, length)
                        .file_name(filename)
                        .mime_str("application/octet-stream")
                        .map_err(classify)?;
                    builder.multipart(Form::new().part(field, part))
                }
            };
            builder.send().await.map_err(classify)
        }
    }

    /// Open `path` as a streaming body; also returns its length.
    async fn stream_file(path: &Path) -> Result<(reqwest::Body, u64), HttpError> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        Ok((reqwest::Body::wrap_stream(ReaderStream::new(file)), length))
    }

    fn classify(e: reqwest::Error) -> HttpError {
        if e.is_timeout() {
            HttpError::Timeout(e.to_string())
        } else {
            HttpError::Transport(e.to_string())
        }
    }

    fn headers_of(resp: &reqwest::Response) -> HttpHeaders {
        resp.headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let resp = self.dispatch(request).await?;
            let status = resp.status().as_u16();
            let headers = headers_of(&resp);
            let body = resp.bytes().await.map_err(classify)?;

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        }

        async fn send_to_file(
            &self,
            request: HttpRequest,
            dest: &Path,
        ) -> Result<FileResponse, HttpError> {
            let resp = self.dispatch(request).await?;
            let status = resp.status().as_u16();
            let headers = headers_of(&resp);

            if !resp.status().is_success() {
                let _ = resp.bytes().await;
                return Ok(FileResponse::not_written(status, headers));
            }

            let mut writer = ScratchWriter::create(dest).await?;
            let mut chunks = resp.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                writer.write(&chunk.map_err(classify)?).await?;
            }
            Ok(writer.finish(status, headers).await?)
        }
    }
}

#[cfg(test)]
pub use script::MockTransport;
