//! The feed adapter interface and the HTTP plumbing shared by adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::asset::AssetClient;
use super::errors::{FeedError, Result};
use super::nuget::NugetClient;
use super::types::{FeedEndpoint, FeedType, Package, PackageVersion};
use super::upack::UpackClient;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody};
use crate::retry::{RetryConfig, with_retry};
use crate::sync::ProgressCallback;

/// Header carrying the feed API key on every request.
pub const API_KEY_HEADER: &str = "X-ApiKey";

/// Ambient state every feed operation observes.
#[derive(Clone, Copy)]
pub struct OpContext<'a> {
    pub cancel: &'a CancellationToken,
    pub on_progress: Option<&'a ProgressCallback>,
}

impl<'a> OpContext<'a> {
    pub fn new(cancel: &'a CancellationToken, on_progress: Option<&'a ProgressCallback>) -> Self {
        Self {
            cancel,
            on_progress,
        }
    }

    /// Return [`FeedError::Cancelled`] if the token already fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(FeedError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A file written to scratch space by [`FeedClient::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-1 computed while streaming.
    pub sha1: String,
}

/// Uniform view of one feed type's HTTP surface.
///
/// `list_packages` must return each package's versions newest-first, exactly
/// as the server lists them; retention and the version cap rely on it.
/// Listing, download, upload and hash lookups retry internally; `delete` is a
/// single attempt so the caller can apply its own termination rules.
#[async_trait]
pub trait FeedClient: Send + Sync {
    fn feed_type(&self) -> FeedType;

    /// Whether [`FeedClient::content_hash`] can return a hash at all.
    fn verifies_content(&self) -> bool {
        true
    }

    async fn list_packages(
        &self,
        endpoint: &FeedEndpoint,
        ctx: OpContext<'_>,
    ) -> Result<Vec<Package>>;

    /// Deterministic scratch location for a package version.
    fn scratch_path(&self, scratch_dir: &Path, package: &PackageVersion) -> PathBuf;

    async fn download(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        dest: &Path,
        ctx: OpContext<'_>,
    ) -> Result<DownloadedArtifact>;

    /// Push `file` to the feed. The file is removed once the server answers 201.
    async fn upload(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        file: &Path,
        ctx: OpContext<'_>,
    ) -> Result<()>;

    async fn delete(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        ctx: OpContext<'_>,
    ) -> Result<()>;

    /// SHA-1 the server reports for a version, `None` when the feed type has
    /// no hash API or the metadata carries no hash.
    async fn content_hash(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        ctx: OpContext<'_>,
    ) -> Result<Option<String>>;
}

/// Build the adapter for a feed type.
#[must_use]
pub fn client_for(feed_type: FeedType, http: FeedHttp) -> Arc<dyn FeedClient> {
    match feed_type {
        FeedType::Upack => Arc::new(UpackClient::new(http)),
        FeedType::Nuget => Arc::new(NugetClient::new(http)),
        FeedType::Asset => Arc::new(AssetClient::new(http)),
    }
}

/// Transport plus timeouts and retry policy, shared by all adapters.
#[derive(Clone)]
pub struct FeedHttp {
    transport: Arc<dyn HttpTransport>,
    retry: RetryConfig,
    request_timeout: Duration,
    list_timeout: Duration,
}

impl FeedHttp {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        retry: RetryConfig,
        request_timeout: Duration,
        list_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            retry,
            request_timeout,
            list_timeout,
        }
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry
    }

    fn request(&self, method: HttpMethod, endpoint: &FeedEndpoint, url: &str) -> HttpRequest {
        HttpRequest::new(method, url)
            .header(API_KEY_HEADER, endpoint.api_key())
            .timeout(self.request_timeout)
    }

    async fn send_cancellable(
        &self,
        request: HttpRequest,
        ctx: OpContext<'_>,
    ) -> Result<HttpResponse> {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(FeedError::Cancelled),
            resp = self.transport.send(request) => resp.map_err(FeedError::from),
        }
    }

    /// One GET that must answer 200; returns the body.
    async fn get_ok(
        &self,
        endpoint: &FeedEndpoint,
        url: &str,
        timeout: Duration,
        ctx: OpContext<'_>,
    ) -> Result<Vec<u8>> {
        let request = self.request(HttpMethod::Get, endpoint, url).timeout(timeout);
        let resp = self.send_cancellable(request, ctx).await?;
        if resp.status != 200 {
            return Err(FeedError::status(resp.status, url, resp.body_text()));
        }
        Ok(resp.body)
    }

    /// GET a listing document and decode it, retrying both steps together.
    pub(crate) async fn get_listing<T, D>(
        &self,
        endpoint: &FeedEndpoint,
        url: &str,
        ctx: OpContext<'_>,
        decode: D,
    ) -> Result<T>
    where
        T: Send,
        D: Fn(&str, &[u8]) -> Result<T> + Sync,
    {
        let decode = &decode;
        with_retry(
            self.retry,
            "list",
            url,
            ctx.cancel,
            ctx.on_progress,
            FeedError::is_retryable,
            || async move {
                let body = self.get_ok(endpoint, url, self.list_timeout, ctx).await?;
                decode(url, &body)
            },
        )
        .await
    }

    /// Single listing GET without retry, for adapters that page or recurse
    /// inside one retried attempt.
    pub(crate) async fn get_listing_once(
        &self,
        endpoint: &FeedEndpoint,
        url: &str,
        ctx: OpContext<'_>,
    ) -> Result<Vec<u8>> {
        self.get_ok(endpoint, url, self.list_timeout, ctx).await
    }

    /// Stream a 200 body into `dest`, retrying on failure.
    ///
    /// An empty body counts as a failed attempt.
    pub(crate) async fn download_to(
        &self,
        endpoint: &FeedEndpoint,
        url: &str,
        label: &str,
        dest: &Path,
        ctx: OpContext<'_>,
    ) -> Result<DownloadedArtifact> {
        with_retry(
            self.retry,
            "download",
            label,
            ctx.cancel,
            ctx.on_progress,
            FeedError::is_retryable,
            || async move {
                let request = self.request(HttpMethod::Get, endpoint, url);
                let resp = self.transport.send_to_file(request, dest).await?;
                if resp.status != 200 {
                    return Err(FeedError::status(resp.status, url, ""));
                }
                if resp.bytes_written == 0 {
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(FeedError::decode(url, "empty artifact body"));
                }
                Ok(DownloadedArtifact {
                    path: dest.to_path_buf(),
                    size: resp.bytes_written,
                    sha1: resp.sha1.unwrap_or_default(),
                })
            },
        )
        .await
    }

    /// PUT `body` until the server answers 201, then remove `file`.
    ///
    /// File bodies are reopened and streamed on every attempt.
    pub(crate) async fn upload_body(
        &self,
        endpoint: &FeedEndpoint,
        url: &str,
        label: &str,
        file: &Path,
        body: RequestBody,
        content_type: Option<&str>,
        ctx: OpContext<'_>,
    ) -> Result<()> {
        let body = &body;
        with_retry(
            self.retry,
            "upload",
            label,
            ctx.cancel,
            ctx.on_progress,
            FeedError::is_retryable,
            || async move {
                let mut request = self.request(HttpMethod::Put, endpoint, url);
                request.body = body.clone();
                if let Some(content_type) = content_type {
                    request = request.header("Content-Type", content_type);
                }
                let resp = self.transport.send(request).await?;
                if resp.status != 201 {
                    return Err(FeedError::status(resp.status, url, resp.body_text()));
                }
                Ok(())
            },
        )
        .await?;

        tokio::fs::remove_file(file)
            .await
            .map_err(|e| FeedError::io(file, e))?;
        tracing::debug!(path = %file.display(), "Removed uploaded scratch file");
        Ok(())
    }

    /// One delete call; any 2xx is success.
    pub(crate) async fn delete_once(
        &self,
        method: HttpMethod,
        endpoint: &FeedEndpoint,
        url: &str,
        ctx: OpContext<'_>,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let resp = self
            .send_cancellable(self.request(method, endpoint, url), ctx)
            .await?;
        if !(200..300).contains(&resp.status) {
            return Err(FeedError::status(resp.status, url, resp.body_text()));
        }
        Ok(())
    }

    /// Fetch a metadata document and pull its `sha1` field.
    pub(crate) async fn fetch_sha1(
        &self,
        endpoint: &FeedEndpoint,
        url: &str,
        label: &str,
        ctx: OpContext<'_>,
    ) -> Result<Option<String>> {
        with_retry(
            self.retry,
            "hash",
            label,
            ctx.cancel,
            ctx.on_progress,
            FeedError::is_retryable,
            || async move {
                let body = self
                    .get_ok(endpoint, url, self.request_timeout, ctx)
                    .await?;
                parse_sha1(url, &body)
            },
        )
        .await
    }
}

fn parse_sha1(url: &str, body: &[u8]) -> Result<Option<String>> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FeedError::decode(url, e))?;
    Ok(value
        .get("sha1")
        .and_then(serde_json::Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty()))
}
