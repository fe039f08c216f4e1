use std::path::{Path, PathBuf};

use feedsync::SyncConfig;

use crate::config::load_sync_config;

fn summary(config: &SyncConfig) -> String {
    let limits = &config.limits;
    let mut out = format!(
        "{} chain(s), {} packages x {} versions per iteration, {} attempts per request\n",
        config.chains.len(),
        limits.max_concurrent_packages,
        limits.max_versions_per_package,
        limits.max_retries,
    );
    for (i, chain) in config.chains.iter().enumerate() {
        out.push_str(&format!(
            "  {}. [{}] {}/{} -> {}/{}\n",
            i + 1,
            chain.chain_type,
            chain.source.host_label(),
            chain.source.feed_name(),
            chain.destination.host_label(),
            chain.destination.feed_name(),
        ));
    }
    let retention = &config.retention;
    if retention.enabled {
        out.push_str(&format!(
            "retention: keep {} version(s){}\n",
            retention.version_limit,
            if retention.dry_run { " (dry-run)" } else { "" }
        ));
    } else {
        out.push_str("retention: disabled\n");
    }
    out
}

pub(crate) fn handle_check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_sync_config(path, PathBuf::new())?;
    for chain in &config.chains {
        chain.source.validate()?;
        chain.destination.validate()?;
    }
    print!("{}", summary(&config));
    Ok(())
}
