//! The remote allow-list store as seen by the reconciler.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::model::{AllowList, AllowListId, ClusterId, NewAllowList};

/// Resource-oriented access to allow-lists and cluster associations.
///
/// Implementations talk to an eventually consistent store: a successful
/// [`set_cluster_allow_list_ids`](Self::set_cluster_allow_list_ids) may not be
/// visible to the next read. Callers are expected to poll.
#[async_trait]
pub trait AllowListApi: Send + Sync {
	/// Lists every user-created allow-list in the project.
	async fn list_allow_lists(&self) -> Result<Vec<AllowList>, ApiError>;

	/// Fetches a single allow-list by id.
	async fn get_allow_list(&self, id: &AllowListId) -> Result<AllowList, ApiError>;

	/// Creates an allow-list. The returned list must carry its id.
	async fn create_allow_list(&self, list: &NewAllowList) -> Result<AllowList, ApiError>;

	/// Reads the ids of every allow-list associated with `cluster_id`.
	async fn cluster_allow_list_ids(&self, cluster_id: &ClusterId) -> Result<BTreeSet<AllowListId>, ApiError>;

	/// Replaces the association set of `cluster_id`.
	///
	/// Returns the set reported by the write response, which may still be stale.
	async fn set_cluster_allow_list_ids(
		&self,
		cluster_id: &ClusterId,
		ids: &BTreeSet<AllowListId>,
	) -> Result<BTreeSet<AllowListId>, ApiError>;

	/// Deletes an allow-list.
	async fn delete_allow_list(&self, id: &AllowListId) -> Result<(), ApiError>;
}
