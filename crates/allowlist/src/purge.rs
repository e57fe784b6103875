//! Removal of a whole allow-list lineage.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{error, info};

use crate::api::AllowListApi;
use crate::error::{ClusterReport, ReconcileError, Result};
use crate::model::{AllowListId, ClusterId, join_ids};
use crate::plan::ClusterChange;
use crate::reconcile::Reconciler;
use crate::version::resolve;

/// What a purge removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
	/// Clusters detached from every version of the prefix.
	pub detached: BTreeSet<ClusterId>,
	/// Lists deleted.
	pub deleted: BTreeSet<AllowListId>,
}

impl<A> Reconciler<A>
where
	A: AllowListApi + 'static,
{
	/// Detaches every version of `prefix` from its clusters, then deletes them.
	///
	/// Lists are only deleted once every cluster is confirmed detached; if any
	/// cluster fails, nothing is deleted and the failures are reported.
	pub async fn purge(&self, prefix: &str) -> Result<PurgeReport> {
		let catalog = self.api.list_allow_lists().await.map_err(ReconcileError::CatalogRead)?;
		let resolution = resolve(prefix, &catalog)?;
		let obsolete = resolution.obsolete_ids();
		let clusters: BTreeSet<ClusterId> = resolution
			.matches()
			.iter()
			.flat_map(|m| m.list.cluster_ids.iter().cloned())
			.collect();
		info!(prefix, lists = %join_ids(&obsolete), clusters = %join_ids(&clusters), "allowlist.purge.start");

		let (detached, failures) = self
			.sync_clusters(&clusters, ClusterChange::Detach { obsolete: obsolete.clone() })
			.await;
		if !failures.is_empty() {
			error!(prefix, failed = failures.len(), "allowlist.purge.partial");
			return Err(ReconcileError::Clusters(ClusterReport {
				allow_list: None,
				converged: detached,
				failures,
			}));
		}

		let mut deleted = BTreeSet::new();
		for id in obsolete {
			self.api
				.delete_allow_list(&id)
				.await
				.map_err(|source| ReconcileError::Delete { id: id.clone(), source })?;
			info!(%id, "allowlist.purge.deleted");
			deleted.insert(id);
		}

		Ok(PurgeReport { detached, deleted })
	}
}
