//! The no-op decision and the additive entry merge.

use std::collections::BTreeSet;

use crate::error::CatalogError;
use crate::model::{AllowList, ClusterId, ReconciliationPlan, ReconciliationRequest};
use crate::naming::{describe, versioned_name};
use crate::plan::affected_clusters;
use crate::version::Resolution;

/// What a request requires given the current catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
	/// The latest version already satisfies the request.
	NoOp(AllowList),
	/// A new version must be created.
	Update(ReconciliationPlan),
}

/// Whether `latest` already permits every entry and covers the explicit cluster.
pub fn is_satisfied(latest: &AllowList, entries: &BTreeSet<String>, cluster_id: Option<&ClusterId>) -> bool {
	entries.is_subset(&latest.entries) && cluster_id.is_none_or(|id| latest.cluster_ids.contains(id))
}

/// Sorted union of the requested entries and the latest version's entries.
pub fn merge_entries(requested: &BTreeSet<String>, latest: Option<&AllowList>) -> BTreeSet<String> {
	let mut merged = requested.clone();
	if let Some(latest) = latest {
		merged.extend(latest.entries.iter().cloned());
	}
	merged
}

/// Decides between a no-op and a new version for `request`.
///
/// Fails when the latest version is already the largest representable one.
pub fn decide(request: &ReconciliationRequest, resolution: &Resolution<'_>) -> Result<Decision, CatalogError> {
	let latest = resolution.latest();

	if let Some(latest) = latest
		&& is_satisfied(latest.list, &request.entries, request.cluster_id.as_ref())
	{
		return Ok(Decision::NoOp(latest.list.clone()));
	}

	let next_version = match latest {
		Some(l) => l.version.checked_add(1).ok_or_else(|| CatalogError::VersionOverflow {
			name: l.list.name.clone(),
			prefix: request.prefix.clone(),
		})?,
		None => 1,
	};
	let merged_entries = merge_entries(&request.entries, latest.map(|l| l.list));

	Ok(Decision::Update(ReconciliationPlan {
		next_version,
		next_version_name: versioned_name(&request.prefix, next_version),
		description: describe(&merged_entries),
		merged_entries,
		affected_cluster_ids: affected_clusters(latest.map(|l| l.list), request.cluster_id.as_ref()),
		obsolete_list_ids: resolution.obsolete_ids(),
	}))
}
