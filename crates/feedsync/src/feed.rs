//! Feed adapters.
//!
//! Each feed type (`upack`, `nuget`, `asset`) speaks its own listing and
//! transfer protocol. This module normalizes them behind [`FeedClient`] and a
//! single package model.
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{FeedEndpoint, FeedHttp, FeedType, OpContext, client_for};
//!
//! let endpoint = FeedEndpoint::new("https://proget.example.com", key, "main", FeedType::Upack);
//! let client = client_for(endpoint.feed_type(), http);
//! let packages = client.list_packages(&endpoint, OpContext::new(&cancel, None)).await?;
//! ```

mod asset;
mod client;
mod errors;
mod nuget;
mod types;
mod upack;

pub use asset::AssetClient;
pub use client::{
    API_KEY_HEADER, DownloadedArtifact, FeedClient, FeedHttp, OpContext, client_for,
};
pub use errors::{FeedError, Result};
pub use nuget::NugetClient;
pub use types::{
    ASSET_VERSION, Asset, AssetKind, FeedEndpoint, FeedType, Package, PackageVersion, clean_url,
    identity, merge_duplicates,
};
pub use upack::UpackClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_url_collapses_double_slashes_after_scheme() {
        assert_eq!(
            clean_url("https://host//upack//main/packages"),
            "https://host/upack/main/packages"
        );
        assert_eq!(clean_url("http://host:8080/a"), "http://host:8080/a");
        assert_eq!(clean_url("no-scheme//path"), "no-scheme//path");
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let ep = FeedEndpoint::new("https://host/base/ ", "k", "main", FeedType::Upack);
        assert_eq!(ep.base_url(), "https://host/base");
        assert_eq!(ep.url("/upack/main/packages"), "https://host/base/upack/main/packages");
    }

    #[test]
    fn test_endpoint_validate() {
        assert!(FeedEndpoint::new("https://host", "k", "f", FeedType::Asset)
            .validate()
            .is_ok());
        let err = FeedEndpoint::new("not a url", "k", "f", FeedType::Asset)
            .validate()
            .expect_err("unparsable");
        assert!(matches!(err, FeedError::InvalidUrl { .. }));
        assert!(FeedEndpoint::new("ftp://host", "k", "f", FeedType::Asset)
            .validate()
            .is_err());
    }

    #[test]
    fn test_endpoint_debug_redacts_api_key() {
        let ep = FeedEndpoint::new("https://host", "super-secret", "f", FeedType::Nuget);
        let debug = format!("{ep:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_host_label() {
        let ep = FeedEndpoint::new("https://host:8624/feeds", "k", "f", FeedType::Upack);
        assert_eq!(ep.host_label(), "https://host:8624");
    }

    #[test]
    fn test_feed_type_parse_and_display() {
        assert_eq!("UPack".parse::<FeedType>().expect("upack"), FeedType::Upack);
        assert_eq!(FeedType::Nuget.to_string(), "nuget");
        assert!(matches!(
            "maven".parse::<FeedType>(),
            Err(FeedError::UnknownFeedType(_))
        ));
        assert!(!FeedType::Asset.supports_retention());
        assert!(FeedType::Upack.supports_retention());
    }

    #[test]
    fn test_merge_duplicates_unions_versions_in_first_seen_order() {
        let merged = merge_duplicates(vec![
            Package::new("g", "a", ["2", "1"]),
            Package::new("", "a", ["9"]),
            Package::new("g", "a", ["1", "0", "0"]),
        ]);
        assert_eq!(
            merged,
            vec![
                Package::new("g", "a", ["2", "1", "0"]),
                Package::new("", "a", ["9"]),
            ]
        );
    }

    #[test]
    fn test_package_version_display_and_identity() {
        let pv = PackageVersion::new("g", "a", "1.0");
        assert_eq!(pv.to_string(), "g/a:1.0");
        assert_eq!(pv.identity(), "g:a");
        assert_eq!(Package::new("g", "a", ["1.0"]).identity(), pv.identity());
    }

    #[test]
    fn test_feed_error_classification() {
        let throttled = FeedError::status(429, "u", "");
        assert!(throttled.is_retryable());
        assert!(throttled.is_policy_terminal());

        let wrapped = FeedError::RetriesExhausted {
            operation: "delete".into(),
            target: "g/a:1".into(),
            attempts: 3,
            last: Box::new(FeedError::status(403, "u", "")),
        };
        assert_eq!(wrapped.status_code(), Some(403));
        assert!(wrapped.is_policy_terminal());
        assert!(!FeedError::Cancelled.is_retryable());
        assert!(!FeedError::UnknownFeedType("x".into()).is_retryable());
    }
}
