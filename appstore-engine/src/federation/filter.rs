//! Offer deduplication on the pull path.

use std::collections::HashSet;

use crate::models::{PullablePackage, Release};
use crate::types::{PackageId, Principal, ReleaseStatus};

/// Drop offers that duplicate something already held locally.
///
/// An offer is suppressed when its `(name, provider, version)` matches a
/// local release that is Published, or any local release owned by
/// `requester` whatever its status. Repeats of the same offer from the same
/// store collapse to the first.
pub fn filter_offers(
    offers: Vec<PullablePackage>,
    local: &[Release],
    requester: &Principal,
) -> Vec<PullablePackage> {
    let held: HashSet<(&str, &str, &str)> = local
        .iter()
        .filter(|release| {
            release.status == ReleaseStatus::Published || requester.owns(&release.owner)
        })
        .map(Release::natural_key)
        .collect();

    let mut seen: HashSet<(String, PackageId)> = HashSet::new();
    offers
        .into_iter()
        .filter(|offer| !held.contains(&offer.natural_key()))
        .filter(|offer| seen.insert((offer.source_store_id.clone(), offer.package_id.clone())))
        .collect()
}
