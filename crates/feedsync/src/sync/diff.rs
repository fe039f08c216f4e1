//! Catalog diffing.
//!
//! Pure functions over two package listings: what the destination is missing
//! and which destination versions fall outside the retention window. No I/O.

use std::collections::{HashMap, HashSet};

use super::types::RetentionPolicy;
use crate::feed::{Package, PackageVersion, merge_duplicates};

/// Whether the version at `position` (0 = newest) may be transferred.
fn retention_eligible(retention: &RetentionPolicy, position: usize) -> bool {
    !retention.enabled || position < retention.version_limit || retention.dry_run
}

/// Compute the package versions present in `source` but missing in
/// `destination`.
///
/// With retention enabled, only the newest `version_limit` source versions
/// are eligible; in dry-run mode older versions stay eligible and are logged.
/// Packages come out in source order, versions in source order, with repeated
/// identities merged.
#[must_use]
pub fn packages_to_sync(
    source: &[Package],
    destination: &[Package],
    retention: &RetentionPolicy,
) -> Vec<Package> {
    let dest_index: HashMap<String, HashSet<&str>> = destination.iter().fold(
        HashMap::with_capacity(destination.len()),
        |mut index, pkg| {
            index
                .entry(pkg.identity())
                .or_default()
                .extend(pkg.versions.iter().map(String::as_str));
            index
        },
    );

    let mut to_sync: Vec<Package> = Vec::new();

    // Retention positions refer to the merged version list.
    for pkg in merge_duplicates(source.to_vec()) {
        let identity = pkg.identity();
        let present = dest_index.get(&identity);
        let mut missing: Vec<String> = Vec::new();

        for (position, version) in pkg.versions.iter().enumerate() {
            if present.is_some_and(|versions| versions.contains(version.as_str())) {
                continue;
            }
            if !retention_eligible(retention, position) {
                continue;
            }
            if retention.enabled && position >= retention.version_limit {
                tracing::warn!(
                    package = %identity,
                    version = %version,
                    limit = retention.version_limit,
                    "Version exceeds retention limit, processed because of dry-run"
                );
            }
            missing.push(version.clone());
        }

        if !missing.is_empty() {
            to_sync.push(Package::new(pkg.group, pkg.name, missing));
        }
    }

    to_sync
}

/// Keep the first `max_packages` packages and the first `max_versions`
/// versions of each.
#[must_use]
pub fn apply_limits(mut packages: Vec<Package>, max_packages: usize, max_versions: usize) -> Vec<Package> {
    packages.truncate(max_packages);
    for pkg in &mut packages {
        pkg.versions.truncate(max_versions);
    }
    packages
}

/// Total number of versions across packages.
#[must_use]
pub fn version_count(packages: &[Package]) -> usize {
    packages.iter().map(|p| p.versions.len()).sum()
}

/// Destination versions beyond the newest `version_limit` of each package.
///
/// Packages at or under the limit contribute nothing.
#[must_use]
pub fn retention_candidates(destination: &[Package], version_limit: usize) -> Vec<PackageVersion> {
    destination
        .iter()
        .filter(|pkg| pkg.versions.len() > version_limit)
        .flat_map(|pkg| {
            pkg.versions[version_limit..]
                .iter()
                .map(|v| PackageVersion::new(pkg.group.clone(), pkg.name.clone(), v.clone()))
        })
        .collect()
}

/// Flatten packages into transfer units, one per version.
#[must_use]
pub fn units(packages: &[Package]) -> Vec<PackageVersion> {
    packages
        .iter()
        .flat_map(|pkg| {
            pkg.versions
                .iter()
                .map(|v| PackageVersion::new(pkg.group.clone(), pkg.name.clone(), v.clone()))
        })
        .collect()
}
