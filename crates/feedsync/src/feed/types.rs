use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::FeedError;

/// The protocol family a feed speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    /// Universal packages (`/upack/{feed}/...`).
    Upack,
    /// NuGet OData feed (`/nuget/{feed}/...`).
    Nuget,
    /// Flat asset directory (`/endpoints/{feed}/...`).
    Asset,
}

impl FeedType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeedType::Upack => "upack",
            FeedType::Nuget => "nuget",
            FeedType::Asset => "asset",
        }
    }

    /// Whether individual versions can be deleted, which retention needs.
    ///
    /// Assets carry a synthetic version and are never pruned.
    #[must_use]
    pub fn supports_retention(self) -> bool {
        !matches!(self, FeedType::Asset)
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upack" => Ok(FeedType::Upack),
            "nuget" => Ok(FeedType::Nuget),
            "asset" => Ok(FeedType::Asset),
            other => Err(FeedError::UnknownFeedType(other.to_string())),
        }
    }
}

/// One side of a sync chain: a named feed on a registry server.
#[derive(Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    base_url: String,
    api_key: String,
    feed_name: String,
    feed_type: FeedType,
}

impl FeedEndpoint {
    /// Create an endpoint. The base URL loses any trailing slash.
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
        feed_name: impl Into<String>,
        feed_type: FeedType,
    ) -> Self {
        Self {
            base_url: clean_url(base_url.as_ref().trim().trim_end_matches('/')),
            api_key: api_key.into(),
            feed_name: feed_name.into(),
            feed_type,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn feed_name(&self) -> &str {
        &self.feed_name
    }

    pub fn feed_type(&self) -> FeedType {
        self.feed_type
    }

    /// Check that the base URL parses as an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), FeedError> {
        let parsed = Url::parse(&self.base_url).map_err(|e| FeedError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" if parsed.host_str().is_some() => Ok(()),
            scheme => Err(FeedError::InvalidUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme or missing host ({scheme})"),
            }),
        }
    }

    /// `scheme://host[:port]` of the base URL, used as the `url` log field.
    #[must_use]
    pub fn host_label(&self) -> String {
        match Url::parse(&self.base_url) {
            Ok(u) => match (u.host_str(), u.port()) {
                (Some(host), Some(port)) => format!("{}://{}:{}", u.scheme(), host, port),
                (Some(host), None) => format!("{}://{}", u.scheme(), host),
                _ => self.base_url.clone(),
            },
            Err(_) => self.base_url.clone(),
        }
    }

    /// Join path segments onto the base URL and clean accidental `//`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        clean_url(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }
}

// Keep API keys out of logs.
impl fmt::Debug for FeedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("feed_name", &self.feed_name)
            .field("feed_type", &self.feed_type)
            .finish()
    }
}

/// Collapse `//` runs after the scheme separator.
///
/// `https://host//upack//feed` becomes `https://host/upack/feed`. Strings
/// without `://` are returned unchanged.
#[must_use]
pub fn clean_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let mut cleaned = String::with_capacity(rest.len());
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        cleaned.push(c);
    }
    format!("{scheme}://{cleaned}")
}

/// A package with its versions, newest first.
///
/// Position 0 of `versions` is the most recent version; retention and the
/// per-package version cap both rely on that ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Group (upack only); empty for other feed types.
    #[serde(default)]
    pub group: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

impl Package {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        versions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }

    /// Identity key `group:name`.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> String {
        identity(&self.group, &self.name)
    }
}

/// Identity key for a group and name.
#[inline]
#[must_use]
pub fn identity(group: &str, name: &str) -> String {
    format!("{group}:{name}")
}

/// One version of one package: the unit of transfer, hashing and deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageVersion {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl PackageVersion {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> String {
        identity(&self.group, &self.name)
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.group, self.name, self.version)
    }
}

/// Kind of an asset directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    File,
    Dir,
}

/// An entry of an asset directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AssetKind,
}

/// Version assigned to every asset; assets are not versioned.
pub const ASSET_VERSION: &str = "0";

/// Merge entries sharing an identity, keeping first-seen order.
///
/// Versions are unioned; a version already present is not repeated.
#[must_use]
pub fn merge_duplicates(packages: Vec<Package>) -> Vec<Package> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(packages.len());
    let mut merged: Vec<Package> = Vec::with_capacity(packages.len());

    for pkg in packages {
        match index.get(&pkg.identity()) {
            Some(&i) => {
                let existing = &mut merged[i];
                for version in pkg.versions {
                    if !existing.versions.contains(&version) {
                        existing.versions.push(version);
                    }
                }
            }
            None => {
                index.insert(pkg.identity(), merged.len());
                let mut pkg = pkg;
                let mut seen = Vec::with_capacity(pkg.versions.len());
                pkg.versions.retain(|v| {
                    if seen.contains(v) {
                        false
                    } else {
                        seen.push(v.clone());
                        true
                    }
                });
                merged.push(pkg);
            }
        }
    }

    merged
}
