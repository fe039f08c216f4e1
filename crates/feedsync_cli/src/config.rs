//! Configuration file support for feedsync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. Environment variables (prefixed with `FEEDSYNC_`, nested keys joined
//!    with `__`, e.g. `FEEDSYNC_TIMEOUT__MAXRETRIES`)
//! 2. Config file (YAML or TOML, picked by extension; default `config.yml`)
//! 3. Built-in defaults
//!
//! Example config file:
//! ```yaml
//! syncChain:
//!   - source:
//!       url: https://proget-a.example.com/
//!       apiKey: "..."
//!       feed: internal
//!     destination:
//!       url: https://proget-b.example.com
//!       apiKey: "..."
//!       feed: mirror
//!     type: upack
//! timeout:
//!   webRequestTimeout: 60   # seconds
//!   iterationTimeout: 300
//!   syncTimeout: 1800
//!   maxRetries: 5
//! proceedPackageLimit: 10
//! proceedPackageVersion: 5
//! retention:
//!   enabled: true
//!   dry-run: false
//!   versionLimit: 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File};
use feedsync::sync::{
    DEFAULT_MAX_CONCURRENT_PACKAGES, DEFAULT_MAX_VERSIONS_PER_PACKAGE, RetentionPolicy,
    SyncChain, SyncConfig, TransferLimits,
};
use feedsync::{FeedEndpoint, FeedType};
use serde::Deserialize;

/// Why a config file could not be turned into a [`SyncConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("configuration validation errors: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Top-level configuration as written in the file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(rename = "syncChain", alias = "syncchain")]
    pub sync_chain: Vec<ChainConfig>,
    pub timeout: TimeoutConfig,
    /// Maximum packages handled per chain per iteration.
    #[serde(rename = "proceedPackageLimit", alias = "proceedpackagelimit")]
    pub proceed_package_limit: i64,
    /// Maximum versions handled per package per iteration.
    #[serde(rename = "proceedPackageVersion", alias = "proceedpackageversion")]
    pub proceed_package_version: i64,
    pub retention: RetentionConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            sync_chain: Vec::new(),
            timeout: TimeoutConfig::default(),
            proceed_package_limit: DEFAULT_MAX_CONCURRENT_PACKAGES as i64,
            proceed_package_version: DEFAULT_MAX_VERSIONS_PER_PACKAGE as i64,
            retention: RetentionConfig::default(),
        }
    }
}

/// One source/destination pair.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    #[serde(rename = "type")]
    pub chain_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(rename = "apiKey", alias = "apikey")]
    pub api_key: String,
    pub feed: String,
}

/// Timeouts in seconds, plus the per-operation attempt budget.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(rename = "webRequestTimeout", alias = "webrequesttimeout")]
    pub web_request_timeout: i64,
    /// Pause between iterations; also bounds each listing call.
    #[serde(rename = "iterationTimeout", alias = "iterationtimeout")]
    pub iteration_timeout: i64,
    /// Deadline for a whole iteration.
    #[serde(rename = "syncTimeout", alias = "synctimeout")]
    pub sync_timeout: i64,
    #[serde(rename = "maxRetries", alias = "maxretries")]
    pub max_retries: i64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let limits = TransferLimits::default();
        Self {
            web_request_timeout: limits.web_request_timeout.as_secs() as i64,
            iteration_timeout: limits.iteration_timeout.as_secs() as i64,
            sync_timeout: limits.sync_timeout.as_secs() as i64,
            max_retries: limits.max_retries as i64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    #[serde(rename = "dry-run", alias = "dry_run", alias = "dryrun")]
    pub dry_run: bool,
    #[serde(rename = "versionLimit", alias = "versionlimit")]
    pub version_limit: i64,
}

impl FileConfig {
    /// Load `path`, then apply `FEEDSYNC_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        tracing::debug!(path = %path.display(), "Loading config");

        let settings = ConfigBuilder::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("FEEDSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<FileConfig>()?)
    }

    /// Collect every validation problem at once.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.proceed_package_limit <= 0 {
            errors.push("invalid proceedPackageLimit: must be greater than 0".to_string());
        }
        if self.proceed_package_version <= 0 {
            errors.push("invalid proceedPackageVersion: must be greater than 0".to_string());
        }
        if self.timeout.sync_timeout <= 0 {
            errors.push("invalid syncTimeout: must be greater than 0".to_string());
        }
        if self.timeout.iteration_timeout <= 0 {
            errors.push("invalid iterationTimeout: must be greater than 0".to_string());
        }
        if self.timeout.web_request_timeout <= 0 {
            errors.push("invalid webRequestTimeout: must be greater than 0".to_string());
        }
        if self.timeout.max_retries <= 0 {
            errors.push("invalid maxRetries: must be greater than 0".to_string());
        }

        if self.sync_chain.is_empty() {
            errors.push("found 0 syncChains".to_string());
        }
        for (i, chain) in self.sync_chain.iter().enumerate() {
            let n = i + 1;
            if chain.source.url.trim().is_empty() {
                errors.push(format!("source URL cannot be empty for chain {n}"));
            }
            if chain.destination.url.trim().is_empty() {
                errors.push(format!("destination URL cannot be empty for chain {n}"));
            }
            if chain.source.api_key.is_empty() {
                errors.push(format!("source API key cannot be empty for chain {n}"));
            }
            if chain.destination.api_key.is_empty() {
                errors.push(format!("destination API key cannot be empty for chain {n}"));
            }
            if let Err(e) = chain.chain_type.parse::<FeedType>() {
                errors.push(format!("chain {n}: {e}"));
            }
        }

        if self.retention.enabled && self.retention.version_limit <= 0 {
            errors.push("invalid versionLimit for retention: must be greater than 0".to_string());
        }

        errors
    }

    /// Validate and convert into the engine's configuration.
    pub fn into_sync_config(self, scratch_dir: PathBuf) -> Result<SyncConfig, ConfigError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let mut chains = Vec::with_capacity(self.sync_chain.len());
        for chain in self.sync_chain {
            let chain_type: FeedType = chain
                .chain_type
                .parse()
                .map_err(|e: feedsync::FeedError| ConfigError::Invalid(vec![e.to_string()]))?;
            chains.push(SyncChain::new(
                chain.source.endpoint(chain_type),
                chain.destination.endpoint(chain_type),
                chain_type,
            ));
        }

        let timeout = &self.timeout;
        let limits = TransferLimits {
            max_concurrent_packages: self.proceed_package_limit as usize,
            max_versions_per_package: self.proceed_package_version as usize,
            web_request_timeout: Duration::from_secs(timeout.web_request_timeout as u64),
            iteration_timeout: Duration::from_secs(timeout.iteration_timeout as u64),
            sync_timeout: Duration::from_secs(timeout.sync_timeout as u64),
            max_retries: timeout.max_retries as usize,
            ..TransferLimits::default()
        };

        let retention = if self.retention.enabled {
            RetentionPolicy::keep(self.retention.version_limit as usize)
                .dry_run(self.retention.dry_run)
        } else {
            RetentionPolicy::disabled()
        };

        Ok(SyncConfig {
            chains,
            limits,
            retention,
            scratch_dir,
        })
    }
}

impl EndpointConfig {
    fn endpoint(&self, feed_type: FeedType) -> FeedEndpoint {
        FeedEndpoint::new(&self.url, self.api_key.clone(), self.feed.clone(), feed_type)
    }
}

/// Load, validate and convert a config file in one step.
pub fn load_sync_config(path: &Path, scratch_dir: PathBuf) -> Result<SyncConfig, ConfigError> {
    FileConfig::load(path)?.into_sync_config(scratch_dir)
}
