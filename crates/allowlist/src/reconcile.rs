//! The reconciliation pass.
//!
//! A pass resolves the latest version of a prefix, decides whether the request
//! is already satisfied, creates the next version if not, and then moves every
//! affected cluster onto it. Clusters are synchronized concurrently and
//! independently: each one reads its current associations, writes its target
//! set, and polls until reads reflect the write. A failing cluster never
//! cancels the others, and nothing is rolled back.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span};

use crate::api::AllowListApi;
use crate::error::{ClusterError, ClusterReport, ReconcileError, Result, SyncPhase};
use crate::merge::{Decision, decide};
use crate::model::{AllowList, ClusterId, ReconciliationRequest, join_ids};
use crate::plan::{AssociationTarget, ClusterChange};
use crate::poll::{ConvergencePoller, PollError, PollPolicy, Sleeper};
use crate::version::resolve;

/// Attempt budget applied to every poll of a pass.
///
/// A cluster runs up to two polls, write confirmation and then read
/// convergence, each with its own `max_attempts`. One cluster therefore waits
/// at most `2 * (max_attempts - 1) * interval`; clusters wait concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
	/// Attempts per poll.
	pub max_attempts: u32,
	/// Delay between attempts.
	pub interval: Duration,
}

impl Default for ReconcileConfig {
	fn default() -> Self {
		Self {
			max_attempts: 30,
			interval: Duration::from_secs(1),
		}
	}
}

impl From<ReconcileConfig> for PollPolicy {
	fn from(config: ReconcileConfig) -> Self {
		Self {
			max_attempts: config.max_attempts,
			interval: config.interval,
		}
	}
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// The latest version already satisfied the request; nothing was written.
	Unchanged(AllowList),
	/// A new version was created and every affected cluster moved onto it.
	Created(AllowList),
}

impl Outcome {
	pub fn allow_list(&self) -> &AllowList {
		match self {
			Self::Unchanged(list) | Self::Created(list) => list,
		}
	}

	pub fn into_allow_list(self) -> AllowList {
		match self {
			Self::Unchanged(list) | Self::Created(list) => list,
		}
	}
}

/// Drives reconciliation passes against one remote store.
pub struct Reconciler<A> {
	pub(crate) api: Arc<A>,
	pub(crate) poller: ConvergencePoller,
}

impl<A> Reconciler<A>
where
	A: AllowListApi + 'static,
{
	/// Creates a reconciler sleeping on the Tokio timer.
	pub fn new(api: Arc<A>, config: ReconcileConfig) -> Self {
		Self {
			api,
			poller: ConvergencePoller::new(config.into()),
		}
	}

	/// Creates a reconciler with a custom sleep source.
	pub fn with_sleeper(api: Arc<A>, config: ReconcileConfig, sleeper: Arc<dyn Sleeper>) -> Self {
		Self {
			api,
			poller: ConvergencePoller::with_sleeper(config.into(), sleeper),
		}
	}

	/// Latest version of `prefix`, if any.
	pub async fn latest(&self, prefix: &str) -> Result<Option<AllowList>> {
		let catalog = self.api.list_allow_lists().await.map_err(ReconcileError::CatalogRead)?;
		let resolution = resolve(prefix, &catalog)?;
		Ok(resolution.latest().map(|latest| latest.list.clone()))
	}

	/// Runs one reconciliation pass for `request`.
	pub async fn reconcile(&self, request: &ReconciliationRequest) -> Result<Outcome> {
		info!(
			prefix = %request.prefix,
			entries = %request.entries.iter().map(String::as_str).collect::<Vec<_>>().join(","),
			cluster = ?request.cluster_id.as_ref().map(ClusterId::as_str),
			"allowlist.reconcile.start"
		);

		let catalog = self.api.list_allow_lists().await.map_err(ReconcileError::CatalogRead)?;
		let resolution = resolve(&request.prefix, &catalog)?;
		if let Some(latest) = resolution.latest() {
			debug!(id = %latest.list.id, name = %latest.list.name, version = latest.version, "allowlist.reconcile.latest");
		}

		let plan = match decide(request, &resolution)? {
			Decision::NoOp(list) => {
				info!(id = %list.id, name = %list.name, "allowlist.reconcile.noop");
				return Ok(Outcome::Unchanged(list));
			}
			Decision::Update(plan) => plan,
		};

		info!(
			name = %plan.next_version_name,
			entries = plan.merged_entries.len(),
			clusters = %join_ids(&plan.affected_cluster_ids),
			"allowlist.reconcile.create"
		);
		let created = self
			.api
			.create_allow_list(&plan.new_allow_list())
			.await
			.map_err(|source| ReconcileError::Create {
				name: plan.next_version_name.clone(),
				source,
			})?;
		if created.id.as_str().is_empty() {
			return Err(ReconcileError::Create {
				name: plan.next_version_name,
				source: crate::error::ApiError::MissingField("id"),
			});
		}
		info!(id = %created.id, name = %created.name, "allowlist.reconcile.created");

		let change = ClusterChange::Replace {
			obsolete: plan.obsolete_list_ids.clone(),
			new_id: created.id.clone(),
		};
		let (converged, failures) = self.sync_clusters(&plan.affected_cluster_ids, change).await;
		if !failures.is_empty() {
			error!(id = %created.id, failed = failures.len(), converged = converged.len(), "allowlist.reconcile.partial");
			return Err(ReconcileError::Clusters(ClusterReport {
				allow_list: Some(created),
				converged,
				failures,
			}));
		}

		let list = self
			.api
			.get_allow_list(&created.id)
			.await
			.map_err(|source| ReconcileError::Fetch {
				id: created.id.clone(),
				source,
			})?;
		info!(id = %list.id, name = %list.name, clusters = %join_ids(&list.cluster_ids), "allowlist.reconcile.done");
		Ok(Outcome::Created(list))
	}

	/// Applies `change` to every cluster concurrently and waits for all of them.
	///
	/// Returns the converged clusters and the failures, ordered by cluster id.
	pub(crate) async fn sync_clusters(
		&self,
		clusters: &BTreeSet<ClusterId>,
		change: ClusterChange,
	) -> (BTreeSet<ClusterId>, Vec<ClusterError>) {
		let change = Arc::new(change);
		let mut tasks = JoinSet::new();
		for cluster_id in clusters {
			let span = info_span!("allowlist.cluster", cluster = %cluster_id);
			let fut = sync_cluster(Arc::clone(&self.api), self.poller.clone(), cluster_id.clone(), Arc::clone(&change));
			tasks.spawn(fut.instrument(span));
		}

		let mut converged = BTreeSet::new();
		let mut failures = Vec::new();
		let mut aborted = Vec::new();
		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok(Ok(cluster_id)) => {
					converged.insert(cluster_id);
				}
				Ok(Err(err)) => {
					error!(error = %err, "allowlist.cluster.failed");
					failures.push(err);
				}
				Err(join_err) => aborted.push(join_err.to_string()),
			}
		}

		// A panicked task cannot report its cluster; attribute the panics to
		// whichever clusters are unaccounted for.
		let reported: BTreeSet<&ClusterId> = converged.iter().chain(failures.iter().map(ClusterError::cluster_id)).collect();
		let missing: Vec<ClusterId> = clusters.iter().filter(|id| !reported.contains(id)).cloned().collect();
		for (cluster_id, reason) in missing.into_iter().zip(aborted.into_iter().chain(std::iter::repeat_with(String::new))) {
			error!(cluster = %cluster_id, reason = %reason, "allowlist.cluster.aborted");
			failures.push(ClusterError::Aborted { cluster_id, reason });
		}

		failures.sort_by(|a, b| a.cluster_id().cmp(b.cluster_id()));
		(converged, failures)
	}
}

/// Moves one cluster's associations to the target derived from `change`.
async fn sync_cluster<A>(
	api: Arc<A>,
	poller: ConvergencePoller,
	cluster_id: ClusterId,
	change: Arc<ClusterChange>,
) -> std::result::Result<ClusterId, ClusterError>
where
	A: AllowListApi + ?Sized,
{
	let current = api
		.cluster_allow_list_ids(&cluster_id)
		.await
		.map_err(|source| ClusterError::Read {
			cluster_id: cluster_id.clone(),
			source,
		})?;
	let target = change.target(cluster_id, &current);
	info!(
		current = %join_ids(&current),
		target = %join_ids(&target.ids),
		"allowlist.cluster.write"
	);

	let (api, target_ref) = (&*api, &target);
	let accepted = poller
		.poll("association write", move |_| async move {
			api.set_cluster_allow_list_ids(&target_ref.cluster_id, &target_ref.ids)
				.await
				.map(Some)
		})
		.await
		.map_err(|err| cluster_error(&target, SyncPhase::Write, err))?;

	if target.is_reflected_by(&accepted) {
		debug!("allowlist.cluster.write_reflected");
		return Ok(target.cluster_id);
	}

	poller
		.poll("association read", move |_| async move {
			let observed = api.cluster_allow_list_ids(&target_ref.cluster_id).await?;
			Ok(target_ref.is_reflected_by(&observed).then_some(()))
		})
		.await
		.map_err(|err| cluster_error(&target, SyncPhase::Read, err))?;

	info!("allowlist.cluster.converged");
	Ok(target.cluster_id)
}

fn cluster_error(target: &AssociationTarget, phase: SyncPhase, err: PollError) -> ClusterError {
	match err {
		PollError::Exhausted { attempts, last_error } => ClusterError::Exhausted {
			cluster_id: target.cluster_id.clone(),
			phase,
			target: target.ids.clone(),
			attempts,
			last_error,
		},
		PollError::Fatal(source) => ClusterError::Rejected {
			cluster_id: target.cluster_id.clone(),
			phase,
			target: target.ids.clone(),
			source,
		},
	}
}

