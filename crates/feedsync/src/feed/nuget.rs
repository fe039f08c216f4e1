//! NuGet OData feeds.
//!
//! The listing is an Atom document; each entry's `<id>` ends in
//! `Packages(Id='NAME',Version='VER')`. Versions are kept in document order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;

use super::client::{DownloadedArtifact, FeedClient, FeedHttp, OpContext};
use super::errors::{FeedError, Result};
use super::types::{FeedEndpoint, FeedType, Package, PackageVersion, merge_duplicates};
use crate::http::{HttpMethod, RequestBody};

/// Multipart form field carrying the package payload.
const PACKAGE_FIELD: &str = "package";

pub struct NugetClient {
    http: FeedHttp,
}

impl NugetClient {
    pub fn new(http: FeedHttp) -> Self {
        Self { http }
    }

    fn package_url(endpoint: &FeedEndpoint, pkg: &PackageVersion) -> String {
        endpoint.url(&format!(
            "nuget/{}/package/{}/{}",
            endpoint.feed_name(),
            pkg.name,
            pkg.version
        ))
    }
}

/// Extract `(name, version)` from an OData entry id.
fn parse_entry_id(id: &str) -> Option<(String, String)> {
    let rest = &id[id.find("Packages(Id='")? + "Packages(Id='".len()..];
    let (name, rest) = rest.split_once('\'')?;
    let rest = rest.strip_prefix(",Version='")?;
    let (version, _) = rest.split_once('\'')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

/// Decode an OData listing into packages, one per id, versions in feed order.
pub(crate) fn decode_feed(url: &str, body: &[u8]) -> Result<Vec<Package>> {
    let xml = std::str::from_utf8(body).map_err(|e| FeedError::decode(url, e))?;
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut packages: Vec<Package> = Vec::new();
    let mut in_id = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(event)) => {
                if event.local_name().as_ref() == b"id" {
                    in_id = true;
                }
            }
            Ok(Event::End(event)) => {
                if event.local_name().as_ref() == b"id" {
                    in_id = false;
                }
            }
            Ok(Event::Text(text)) => {
                if in_id {
                    let value = text.unescape().map_err(|e| FeedError::decode(url, e))?;
                    if let Some((name, version)) = parse_entry_id(&value) {
                        packages.push(Package::new("", name, [version]));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FeedError::decode(url, e)),
            _ => {}
        }
    }

    Ok(merge_duplicates(packages))
}

#[async_trait]
impl FeedClient for NugetClient {
    fn feed_type(&self) -> FeedType {
        FeedType::Nuget
    }

    fn verifies_content(&self) -> bool {
        false
    }

    async fn list_packages(
        &self,
        endpoint: &FeedEndpoint,
        ctx: OpContext<'_>,
    ) -> Result<Vec<Package>> {
        let url = endpoint.url(&format!("nuget/{}/packages", endpoint.feed_name()));
        self.http.get_listing(endpoint, &url, ctx, decode_feed).await
    }

    fn scratch_path(&self, scratch_dir: &Path, package: &PackageVersion) -> PathBuf {
        scratch_dir.join(format!("{}.{}.nupkg", package.name, package.version))
    }

    async fn download(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        dest: &Path,
        ctx: OpContext<'_>,
    ) -> Result<DownloadedArtifact> {
        let url = Self::package_url(endpoint, package);
        self.http
            .download_to(endpoint, &url, &package.to_string(), dest, ctx)
            .await
    }

    async fn upload(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        file: &Path,
        ctx: OpContext<'_>,
    ) -> Result<()> {
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}.nupkg", package.name, package.version));
        let body = RequestBody::MultipartFile {
            field: PACKAGE_FIELD.to_string(),
            filename,
            path: file.to_path_buf(),
        };
        let url = endpoint.url(&format!("nuget/{}/upload", endpoint.feed_name()));
        self.http
            .upload_body(
                endpoint,
                &url,
                &package.to_string(),
                file,
                body,
                None,
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
        let url = Self::package_url(endpoint, package);
        self.http
            .delete_once(HttpMethod::Delete, endpoint, &url, ctx)
            .await
    }

    async fn content_hash(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        _ctx: OpContext<'_>,
    ) -> Result<Option<String>> {
        tracing::warn!(
            url = %endpoint.host_label(),
            feed = endpoint.feed_name(),
            package = %package,
            "NuGet feeds expose no hash API, skipping verification"
        );
        Ok(None)
    }
}
