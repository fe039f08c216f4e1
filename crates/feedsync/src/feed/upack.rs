//! Universal package feeds.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::client::{DownloadedArtifact, FeedClient, FeedHttp, OpContext};
use super::errors::{FeedError, Result};
use super::types::{FeedEndpoint, FeedType, Package, PackageVersion, merge_duplicates};
use crate::http::{HttpMethod, RequestBody};

pub struct UpackClient {
    http: FeedHttp,
}

impl UpackClient {
    pub fn new(http: FeedHttp) -> Self {
        Self { http }
    }

    fn packages_url(endpoint: &FeedEndpoint) -> String {
        endpoint.url(&format!("upack/{}/packages", endpoint.feed_name()))
    }

    fn download_url(endpoint: &FeedEndpoint, pkg: &PackageVersion) -> String {
        endpoint.url(&format!(
            "upack/{}/download/{}/{}/{}",
            endpoint.feed_name(),
            pkg.group,
            pkg.name,
            pkg.version
        ))
    }

    fn upload_url(endpoint: &FeedEndpoint) -> String {
        endpoint.url(&format!("upack/{}/upload", endpoint.feed_name()))
    }

    fn delete_url(endpoint: &FeedEndpoint, pkg: &PackageVersion) -> String {
        endpoint.url(&format!(
            "upack/{}/delete/{}/{}/{}",
            endpoint.feed_name(),
            pkg.group,
            pkg.name,
            pkg.version
        ))
    }

    fn versions_url(endpoint: &FeedEndpoint, pkg: &PackageVersion) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("group", &pkg.group)
            .append_pair("name", &pkg.name)
            .append_pair("version", &pkg.version)
            .finish();
        format!(
            "{}?{}",
            endpoint.url(&format!("upack/{}/versions", endpoint.feed_name())),
            query
        )
    }
}

/// Decode the JSON package listing, merging duplicate identities.
pub(crate) fn decode_packages(url: &str, body: &[u8]) -> Result<Vec<Package>> {
    let packages: Vec<Package> =
        serde_json::from_slice(body).map_err(|e| FeedError::decode(url, e))?;
    Ok(merge_duplicates(packages))
}

#[async_trait]
impl FeedClient for UpackClient {
    fn feed_type(&self) -> FeedType {
        FeedType::Upack
    }

    async fn list_packages(
        &self,
        endpoint: &FeedEndpoint,
        ctx: OpContext<'_>,
    ) -> Result<Vec<Package>> {
        let url = Self::packages_url(endpoint);
        self.http
            .get_listing(endpoint, &url, ctx, decode_packages)
            .await
    }

    fn scratch_path(&self, scratch_dir: &Path, package: &PackageVersion) -> PathBuf {
        scratch_dir.join(format!("{}.{}.upack", package.name, package.version))
    }

    async fn download(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        dest: &Path,
        ctx: OpContext<'_>,
    ) -> Result<DownloadedArtifact> {
        let url = Self::download_url(endpoint, package);
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
        let url = Self::upload_url(endpoint);
        self.http
            .upload_body(
                endpoint,
                &url,
                &package.to_string(),
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
        let url = Self::delete_url(endpoint, package);
        self.http
            .delete_once(HttpMethod::Post, endpoint, &url, ctx)
            .await
    }

    async fn content_hash(
        &self,
        endpoint: &FeedEndpoint,
        package: &PackageVersion,
        ctx: OpContext<'_>,
    ) -> Result<Option<String>> {
        let url = Self::versions_url(endpoint, package);
        self.http
            .fetch_sha1(endpoint, &url, &package.to_string(), ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::client::test_support::{BASE, endpoint, feed_http};
    use crate::http::MockTransport;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn decode_packages_merges_duplicate_identities() {
        let body = br#"[
            {"group":"g","name":"a","versions":["2","1"]},
            {"group":"g","name":"b","versions":["7"]},
            {"group":"g","name":"a","versions":["1","0"]}
        ]"#;
        let packages = decode_packages("u", body).expect("decode");
        assert_eq!(
            packages,
            vec![
                Package::new("g", "a", ["2", "1", "0"]),
                Package::new("g", "b", ["7"]),
            ]
        );
    }

    #[test]
    fn decode_packages_defaults_missing_group() {
        let packages = decode_packages("u", br#"[{"name":"a","versions":["1"]}]"#).expect("decode");
        assert_eq!(packages[0].group, "");
    }

    #[test]
    fn urls_follow_the_upack_layout() {
        let ep = endpoint(FeedType::Upack);
        let pkg = PackageVersion::new("g", "a", "1.0.0");
        assert_eq!(
            UpackClient::download_url(&ep, &pkg),
            format!("{BASE}/upack/main/download/g/a/1.0.0")
        );
        assert_eq!(
            UpackClient::delete_url(&ep, &pkg),
            format!("{BASE}/upack/main/delete/g/a/1.0.0")
        );
        assert_eq!(
            UpackClient::versions_url(&ep, &pkg),
            format!("{BASE}/upack/main/versions?group=g&name=a&version=1.0.0")
        );
    }

    #[test]
    fn empty_group_does_not_leave_double_slashes() {
        let ep = endpoint(FeedType::Upack);
        let pkg = PackageVersion::new("", "a", "1");
        assert_eq!(
            UpackClient::download_url(&ep, &pkg),
            format!("{BASE}/upack/main/download/a/1")
        );
    }

    #[test]
    fn scratch_path_uses_name_and_version() {
        let client = UpackClient::new(feed_http(&MockTransport::new()));
        let path = client.scratch_path(Path::new("/tmp/s"), &PackageVersion::new("g", "a", "1"));
        assert_eq!(path, PathBuf::from("/tmp/s/a.1.upack"));
    }

    #[tokio::test(start_paused = true)]
    async fn list_retries_malformed_listing() {
        let mock = MockTransport::new();
        let url = format!("{BASE}/upack/main/packages");
        mock.push(HttpMethod::Get, &url, 200, b"not json");
        mock.push(HttpMethod::Get, &url, 503, b"");
        mock.push(
            HttpMethod::Get,
            &url,
            200,
            br#"[{"group":"g","name":"a","versions":["1"]}]"#,
        );
        let cancel = CancellationToken::new();

        let packages = UpackClient::new(feed_http(&mock))
            .list_packages(&endpoint(FeedType::Upack), OpContext::new(&cancel, None))
            .await
            .expect("third attempt succeeds");

        assert_eq!(packages, vec![Package::new("g", "a", ["1"])]);
        assert_eq!(mock.count(HttpMethod::Get, &url), 3);
    }

    #[tokio::test]
    async fn delete_uses_post() {
        let mock = MockTransport::new();
        let url = format!("{BASE}/upack/main/delete/g/a/1");
        mock.push(HttpMethod::Post, &url, 200, b"");
        let cancel = CancellationToken::new();

        UpackClient::new(feed_http(&mock))
            .delete(
                &endpoint(FeedType::Upack),
                &PackageVersion::new("g", "a", "1"),
                OpContext::new(&cancel, None),
            )
            .await
            .expect("delete");

        assert_eq!(mock.count(HttpMethod::Post, &url), 1);
    }

    #[tokio::test]
    async fn content_hash_reads_versions_endpoint() {
        let mock = MockTransport::new();
        let url = format!("{BASE}/upack/main/versions?group=g&name=a&version=1");
        mock.push(HttpMethod::Get, &url, 200, br#"{"sha1":"abc123"}"#);
        let cancel = CancellationToken::new();

        let hash = UpackClient::new(feed_http(&mock))
            .content_hash(
                &endpoint(FeedType::Upack),
                &PackageVersion::new("g", "a", "1"),
                OpContext::new(&cancel, None),
            )
            .await
            .expect("hash");

        assert_eq!(hash.as_deref(), Some("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_streams_the_scratch_file_on_every_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.1.upack");
        tokio::fs::write(&file, b"payload").await.expect("write");

        let mock = MockTransport::new();
        let url = format!("{BASE}/upack/main/upload");
        mock.push_transport_error(HttpMethod::Put, &url, "connection reset");
        mock.push(HttpMethod::Put, &url, 201, b"");
        let cancel = CancellationToken::new();

        UpackClient::new(feed_http(&mock))
            .upload(
                &endpoint(FeedType::Upack),
                &PackageVersion::new("g", "a", "1"),
                &file,
                OpContext::new(&cancel, None),
            )
            .await
            .expect("upload");

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert_eq!(request.body, RequestBody::File(file.clone()));
            assert_eq!(
                crate::http::header_get(&request.headers, "content-type"),
                Some("application/octet-stream")
            );
        }
        assert!(!file.exists());
    }
}
