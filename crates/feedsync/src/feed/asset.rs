//! Asset directories.
//!
//! Assets are plain files in a directory tree. Listing flattens the tree into
//! packages named by relative path, each with the single version
//! [`ASSET_VERSION`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::client::{DownloadedArtifact, FeedClient, FeedHttp, OpContext};
use super::errors::{FeedError, Result};
use super::types::{
    ASSET_VERSION, Asset, AssetKind, FeedEndpoint, FeedType, Package, PackageVersion,
    merge_duplicates,
};
use crate::http::{HttpMethod, RequestBody};
use crate::retry::with_retry;

pub struct AssetClient {
    http: FeedHttp,
}

impl AssetClient {
    pub fn new(http: FeedHttp) -> Self {
        Self { http }
    }

    fn dir_url(endpoint: &FeedEndpoint, prefix: &str) -> String {
        if prefix.is_empty() {
            endpoint.url(&format!("endpoints/{}/dir", endpoint.feed_name()))
        } else {
            endpoint.url(&format!("endpoints/{}/dir/{}", endpoint.feed_name(), prefix))
        }
    }

    fn item_url(endpoint: &FeedEndpoint, kind: &str, name: &str) -> String {
        endpoint.url(&format!("endpoints/{}/{}/{}", endpoint.feed_name(), kind, name))
    }

    /// List one directory, descending into subdirectories in place.
    fn list_dir<'a>(
        &'a self,
        endpoint: &'a FeedEndpoint,
        prefix: String,
        ctx: OpContext<'a>,
    ) -> BoxFuture<'a, Result<Vec<Package>>> {
        Box::pin(async move {
            let url = Self::dir_url(endpoint, &prefix);
            let body = self.http.get_listing_once(endpoint, &url, ctx).await?;
            let entries = decode_dir(&url, &body)?;

            let mut packages = Vec::with_capacity(entries.len());
            for entry in entries {
                let path = if prefix.is_empty() {
                    entry.name
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                match entry.kind {
                    AssetKind::File => packages.push(Package::new("", path, [ASSET_VERSION])),
                    AssetKind::Dir => {
                        tracing::debug!(url = %endpoint.host_label(), dir = %path, "Descending into asset directory");
                        packages.extend(self.list_dir(endpoint, path, ctx).await?);
                    }
                }
            }
            Ok(packages)
        })
    }
}

fn decode_dir(url: &str, body: &[u8]) -> Result<Vec<Asset>> {
    serde_json::from_slice(body).map_err(|e| FeedError::decode(url, e))
}

/// Map a relative asset path under `root`, dropping components that would
/// escape it.
fn contained_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

#[async_trait]
impl FeedClient for AssetClient {
    fn feed_type(&self) -> FeedType {
        FeedType::Asset
    }

    /// The whole tree walk is one retried attempt.
    async fn list_packages(
        &self,
        endpoint: &FeedEndpoint,
        ctx: OpContext<'_>,
    ) -> Result<Vec<Package>> {
        let root = Self::dir_url(endpoint, "");
        let packages = with_retry(
            self.http.retry(),
            "list",
            &root,
            ctx.cancel,
            ctx.on_progress,
            FeedError::is_retryable,
            || self.list_dir(endpoint, String::new(), ctx),
        )
        .await?;
        Ok(merge_duplicates(packages))
    }

    fn scratch_path(&self, scratch_dir: &Path, package: &PackageVersion) -> PathBuf {
        contained_path(scratch_dir, &package.name)
    }

    async fn download(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        dest: &Path,
        ctx: OpContext<'_>,
    ) -> Result<DownloadedArtifact> {
        let url = Self::item_url(endpoint, "content", &package.name);
        self.http
            .download_to(endpoint, &url, &package.name, dest, ctx)
            .await
    }

    async fn upload(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        file: &Path,
        ctx: OpContext<'_>,
    ) -> Result<()> {
        let url = Self::item_url(endpoint, "content", &package.name);
        self.http
            .upload_body(
                endpoint,
                &url,
                &package.name,
                file,
                RequestBody::File(file.to_path_buf()),
                Some("application/octet-stream"),
                ctx,
            )
            .await
    }

    async fn delete(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        ctx: OpContext<'_>,
    ) -> Result<()> {
        let url = Self::item_url(endpoint, "delete", &package.name);
        self.http
            .delete_once(HttpMethod::Delete, endpoint, &url, ctx)
            .await
    }

    async fn content_hash(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        ctx: OpContext<'_>,
    ) -> Result<Option<String>> {
        let url = Self::item_url(endpoint, "metadata", &package.name);
        self.http
            .fetch_sha1(endpoint, &url, &package.name, ctx)
            .await
    }
}
