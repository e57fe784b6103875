//! In-memory [`AllowListApi`] with eventually consistent association reads.
//!
//! Association writes commit immediately, but reads (and optionally write
//! responses) keep returning the previous set for a configurable number of
//! calls. Failures can be queued per operation, and every write is counted so
//! callers can assert that a pass performed none.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::AllowListApi;
use crate::error::ApiError;
use crate::model::{AllowList, AllowListId, ClusterId, NewAllowList};
use crate::poll::Sleeper;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
	List,
	Get,
	Create,
	ReadAssociations,
	WriteAssociations,
	Delete,
}

/// Number of mutating calls served so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCounts {
	pub creates: u32,
	pub association_writes: u32,
	pub deletes: u32,
}

impl WriteCounts {
	pub fn total(&self) -> u32 {
		self.creates + self.association_writes + self.deletes
	}
}

#[derive(Debug, Clone)]
struct StoredList {
	id: AllowListId,
	name: String,
	description: String,
	entries: BTreeSet<String>,
}

#[derive(Debug, Default, Clone)]
struct ClusterState {
	committed: BTreeSet<AllowListId>,
	stale: BTreeSet<AllowListId>,
	/// Reads left before `committed` becomes visible.
	stale_reads: u32,
}

impl ClusterState {
	fn visible(&mut self) -> BTreeSet<AllowListId> {
		if self.stale_reads == 0 {
			return self.committed.clone();
		}
		self.stale_reads = self.stale_reads.saturating_sub(1);
		self.stale.clone()
	}
}

#[derive(Debug, Default)]
struct State {
	next_id: u64,
	lists: Vec<StoredList>,
	clusters: BTreeMap<ClusterId, ClusterState>,
	read_lag: u32,
	stale_write_responses: bool,
	failures: HashMap<Op, VecDeque<ApiError>>,
	cluster_failures: HashMap<(Op, ClusterId), VecDeque<ApiError>>,
	writes: WriteCounts,
}

impl State {
	fn take_failure(&mut self, op: Op, cluster_id: Option<&ClusterId>) -> Result<(), ApiError> {
		if let Some(cluster_id) = cluster_id
			&& let Some(err) = self.cluster_failures.get_mut(&(op, cluster_id.clone())).and_then(VecDeque::pop_front)
		{
			return Err(err);
		}
		match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	fn materialize(&self, stored: &StoredList) -> AllowList {
		AllowList {
			id: stored.id.clone(),
			name: stored.name.clone(),
			description: stored.description.clone(),
			entries: stored.entries.clone(),
			cluster_ids: self
				.clusters
				.iter()
				.filter(|(_, state)| state.committed.contains(&stored.id))
				.map(|(id, _)| id.clone())
				.collect(),
		}
	}

	fn insert(&mut self, name: &str, description: &str, entries: BTreeSet<String>) -> AllowListId {
		self.next_id += 1;
		let id = AllowListId::new(format!("al-{}", self.next_id));
		self.lists.push(StoredList {
			id: id.clone(),
			name: name.to_owned(),
			description: description.to_owned(),
			entries,
		});
		id
	}

	fn cluster(&mut self, cluster_id: &ClusterId) -> Result<&mut ClusterState, ApiError> {
		self.clusters.get_mut(cluster_id).ok_or_else(|| ApiError::Status {
			status: 404,
			detail: format!("cluster {cluster_id} not found"),
		})
	}
}

/// Eventually consistent in-memory allow-list store.
#[derive(Debug, Default)]
pub struct MemoryApi {
	state: Mutex<State>,
}

impl MemoryApi {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a cluster with no associations.
	pub fn add_cluster(&self, cluster_id: impl Into<ClusterId>) {
		self.state.lock().clusters.entry(cluster_id.into()).or_default();
	}

	/// Inserts a list directly, associating it with `clusters` (created on demand).
	pub fn seed_list(&self, name: &str, entries: &[&str], clusters: &[&str]) -> AllowListId {
		let mut state = self.state.lock();
		let entries = entries.iter().map(|entry| entry.to_string()).collect::<BTreeSet<_>>();
		let description = crate::naming::describe(&entries);
		let id = state.insert(name, &description, entries);
		for cluster in clusters {
			state.clusters.entry((*cluster).into()).or_default().committed.insert(id.clone());
		}
		id
	}

	/// Makes the next `reads` association reads after each write return the
	/// pre-write set.
	pub fn set_read_lag(&self, reads: u32) {
		self.state.lock().read_lag = reads;
	}

	/// Makes association write responses echo the pre-write set.
	pub fn set_stale_write_responses(&self, stale: bool) {
		self.state.lock().stale_write_responses = stale;
	}

	/// Queues an error for the next call of `op`.
	pub fn fail_next(&self, op: Op, err: ApiError) {
		self.state.lock().failures.entry(op).or_default().push_back(err);
	}

	/// Queues an error for the next call of `op` against one cluster.
	pub fn fail_next_for(&self, op: Op, cluster_id: impl Into<ClusterId>, err: ApiError) {
		self.state
			.lock()
			.cluster_failures
			.entry((op, cluster_id.into()))
			.or_default()
			.push_back(err);
	}

	pub fn writes(&self) -> WriteCounts {
		self.state.lock().writes
	}

	/// Committed associations of a cluster, bypassing read lag.
	pub fn committed_associations(&self, cluster_id: &ClusterId) -> BTreeSet<AllowListId> {
		self.state
			.lock()
			.clusters
			.get(cluster_id)
			.map(|state| state.committed.clone())
			.unwrap_or_default()
	}

	/// Names of every stored list, in creation order.
	pub fn list_names(&self) -> Vec<String> {
		self.state.lock().lists.iter().map(|list| list.name.clone()).collect()
	}
}

#[async_trait]
impl AllowListApi for MemoryApi {
	async fn list_allow_lists(&self) -> Result<Vec<AllowList>, ApiError> {
		let mut state = self.state.lock();
		state.take_failure(Op::List, None)?;
		Ok(state.lists.iter().map(|list| state.materialize(list)).collect())
	}

	async fn get_allow_list(&self, id: &AllowListId) -> Result<AllowList, ApiError> {
		let mut state = self.state.lock();
		state.take_failure(Op::Get, None)?;
		let stored = state.lists.iter().find(|list| &list.id == id).ok_or_else(|| ApiError::Status {
			status: 404,
			detail: format!("allow list {id} not found"),
		})?;
		Ok(state.materialize(stored))
	}

	async fn create_allow_list(&self, list: &NewAllowList) -> Result<AllowList, ApiError> {
		let mut state = self.state.lock();
		state.take_failure(Op::Create, None)?;
		state.writes.creates += 1;
		let id = state.insert(&list.name, &list.description, list.entries.clone());
		Ok(AllowList {
			id,
			name: list.name.clone(),
			description: list.description.clone(),
			entries: list.entries.clone(),
			cluster_ids: BTreeSet::new(),
		})
	}

	async fn cluster_allow_list_ids(&self, cluster_id: &ClusterId) -> Result<BTreeSet<AllowListId>, ApiError> {
		let mut state = self.state.lock();
		state.take_failure(Op::ReadAssociations, Some(cluster_id))?;
		Ok(state.cluster(cluster_id)?.visible())
	}

	async fn set_cluster_allow_list_ids(
		&self,
		cluster_id: &ClusterId,
		ids: &BTreeSet<AllowListId>,
	) -> Result<BTreeSet<AllowListId>, ApiError> {
		let mut state = self.state.lock();
		state.take_failure(Op::WriteAssociations, Some(cluster_id))?;
		let read_lag = state.read_lag;
		let stale_write_responses = state.stale_write_responses;
		let cluster = state.cluster(cluster_id)?;
		let previous = std::mem::replace(&mut cluster.committed, ids.clone());
		cluster.stale = previous.clone();
		cluster.stale_reads = read_lag;
		state.writes.association_writes += 1;
		Ok(if stale_write_responses { previous } else { ids.clone() })
	}

	async fn delete_allow_list(&self, id: &AllowListId) -> Result<(), ApiError> {
		let mut state = self.state.lock();
		state.take_failure(Op::Delete, None)?;
		let before = state.lists.len();
		state.lists.retain(|list| &list.id != id);
		if state.lists.len() == before {
			return Err(ApiError::Status {
				status: 404,
				detail: format!("allow list {id} not found"),
			});
		}
		state.writes.deletes += 1;
		Ok(())
	}
}

/// Sleeper that returns immediately and records what it was asked to wait.
#[derive(Debug, Default)]
pub struct InstantSleeper {
	slept: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of sleeps requested so far.
	pub fn count(&self) -> usize {
		self.slept.lock().len()
	}

	/// Sum of every requested sleep.
	pub fn total(&self) -> Duration {
		self.slept.lock().iter().sum()
	}
}

#[async_trait]
impl Sleeper for InstantSleeper {
	async fn sleep(&self, duration: Duration) {
		self.slept.lock().push(duration);
		tokio::task::yield_now().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn lagging_reads_show_previous_set() {
		let api = MemoryApi::new();
		let old = api.seed_list("acct--v1", &["10.0.0.1/32"], &["c1"]);
		api.set_read_lag(2);

		let new_ids = BTreeSet::from([AllowListId::from("al-9")]);
		let echoed = api.set_cluster_allow_list_ids(&"c1".into(), &new_ids).await.unwrap();
		assert_eq!(echoed, new_ids);

		let stale = BTreeSet::from([old]);
		assert_eq!(api.cluster_allow_list_ids(&"c1".into()).await.unwrap(), stale);
		assert_eq!(api.cluster_allow_list_ids(&"c1".into()).await.unwrap(), stale);
		assert_eq!(api.cluster_allow_list_ids(&"c1".into()).await.unwrap(), new_ids);
		assert_eq!(api.writes().association_writes, 1);
	}

	#[tokio::test]
	async fn queued_failures_are_consumed_in_order() {
		let api = MemoryApi::new();
		api.fail_next(Op::List, ApiError::Transport("down".into()));
		assert!(api.list_allow_lists().await.is_err());
		assert!(api.list_allow_lists().await.is_ok());
	}

	#[tokio::test]
	async fn cluster_ids_follow_committed_associations() {
		let api = MemoryApi::new();
		let id = api.seed_list("acct--v1", &["10.0.0.1/32"], &["c1", "c2"]);
		let list = api.get_allow_list(&id).await.unwrap();
		assert_eq!(list.cluster_ids, ["c1", "c2"].into_iter().map(ClusterId::from).collect::<BTreeSet<_>>());
		assert_eq!(list.description, "Allow list for 10.0.0.1/32");
	}

	#[tokio::test]
	async fn unknown_cluster_is_not_found() {
		let api = MemoryApi::new();
		let err = api.cluster_allow_list_ids(&"ghost".into()).await.unwrap_err();
		assert!(matches!(err, ApiError::Status { status: 404, .. }));
	}
}
