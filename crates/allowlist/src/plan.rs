//! Per-cluster association planning.
//!
//! Targets are computed from a fresh read of each cluster's associations at
//! reconciliation time rather than from the catalog snapshot, so clusters that
//! changed since resolution are not clobbered.

use std::collections::BTreeSet;

use crate::model::{AllowList, AllowListId, ClusterId};

/// Clusters that must be moved onto the new version.
///
/// The explicit cluster plus every cluster of the previous latest version.
pub fn affected_clusters(previous: Option<&AllowList>, explicit: Option<&ClusterId>) -> BTreeSet<ClusterId> {
	let mut clusters = previous.map(|list| list.cluster_ids.clone()).unwrap_or_default();
	clusters.extend(explicit.cloned());
	clusters
}

/// How every affected cluster's associations change in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterChange {
	/// Drop every listed id and attach `new_id`.
	Replace {
		obsolete: BTreeSet<AllowListId>,
		new_id: AllowListId,
	},
	/// Drop every listed id.
	Detach { obsolete: BTreeSet<AllowListId> },
}

impl ClusterChange {
	fn obsolete(&self) -> &BTreeSet<AllowListId> {
		match self {
			Self::Replace { obsolete, .. } | Self::Detach { obsolete } => obsolete,
		}
	}

	fn new_id(&self) -> Option<&AllowListId> {
		match self {
			Self::Replace { new_id, .. } => Some(new_id),
			Self::Detach { .. } => None,
		}
	}

	/// Target association set for a cluster currently holding `current`.
	pub fn target(&self, cluster_id: ClusterId, current: &BTreeSet<AllowListId>) -> AssociationTarget {
		let mut ids: BTreeSet<AllowListId> = current.difference(self.obsolete()).cloned().collect();
		ids.extend(self.new_id().cloned());
		AssociationTarget {
			cluster_id,
			ids,
			required: self.new_id().cloned(),
			forbidden: self.obsolete().clone(),
		}
	}
}

/// The association set one cluster is being moved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTarget {
	pub cluster_id: ClusterId,
	/// Full set written to the cluster.
	pub ids: BTreeSet<AllowListId>,
	required: Option<AllowListId>,
	forbidden: BTreeSet<AllowListId>,
}

impl AssociationTarget {
	/// Whether an observed association set reflects this target.
	///
	/// Only the ids this pass owns are checked: the new version must be present
	/// and no version of the prefix may remain. Unrelated ids added by other
	/// writers in the meantime are tolerated.
	pub fn is_reflected_by(&self, observed: &BTreeSet<AllowListId>) -> bool {
		self.required.as_ref().is_none_or(|id| observed.contains(id)) && observed.is_disjoint(&self.forbidden)
	}
}
