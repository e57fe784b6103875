//! End-to-end reconciliation passes against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use ybm_allowlist::memory::{InstantSleeper, MemoryApi, Op};
use ybm_allowlist::{
	AllowListId, ApiError, CatalogError, ClusterError, ClusterId, Outcome, ReconcileConfig, ReconcileError, Reconciler,
	ReconciliationRequest, SyncPhase,
};

fn reconciler(api: &Arc<MemoryApi>, max_attempts: u32) -> (Reconciler<MemoryApi>, Arc<InstantSleeper>) {
	let sleeper = Arc::new(InstantSleeper::new());
	let config = ReconcileConfig {
		max_attempts,
		interval: Duration::from_secs(1),
	};
	(Reconciler::with_sleeper(Arc::clone(api), config, sleeper.clone()), sleeper)
}

fn request(entries: &[&str]) -> ReconciliationRequest {
	ReconciliationRequest::new("acct", entries).unwrap()
}

fn ids(items: &[&AllowListId]) -> BTreeSet<AllowListId> {
	items.iter().map(|id| (*id).clone()).collect()
}

fn clusters(items: &[&str]) -> BTreeSet<ClusterId> {
	items.iter().map(|id| ClusterId::from(*id)).collect()
}

fn entries(items: &[&str]) -> BTreeSet<String> {
	items.iter().map(|e| e.to_string()).collect()
}

#[tokio::test]
async fn creates_first_version_and_associates_cluster() {
	let api = Arc::new(MemoryApi::new());
	api.add_cluster("c1");
	let (reconciler, _) = reconciler(&api, 5);

	let outcome = reconciler.reconcile(&request(&["127.0.0.1/32"]).with_cluster("c1")).await.unwrap();

	let Outcome::Created(list) = outcome else {
		panic!("expected a new version, got {outcome:?}");
	};
	assert_eq!(list.name, "acct--v1");
	assert_eq!(list.entries, entries(&["127.0.0.1/32"]));
	assert_eq!(list.description, "Allow list for 127.0.0.1/32");
	assert_eq!(list.cluster_ids, clusters(&["c1"]));
	assert_eq!(api.committed_associations(&"c1".into()), ids(&[&list.id]));
}

#[tokio::test]
async fn new_entry_creates_next_version_and_moves_clusters() {
	let api = Arc::new(MemoryApi::new());
	let v1 = api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	let (reconciler, _) = reconciler(&api, 5);

	let list = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap().into_allow_list();

	assert_eq!(list.name, "acct--v2");
	assert_eq!(list.entries, entries(&["127.0.0.1/32", "127.0.0.2/32"]));
	assert_eq!(list.cluster_ids, clusters(&["c1"]));
	let committed = api.committed_associations(&"c1".into());
	assert_eq!(committed, ids(&[&list.id]));
	assert!(!committed.contains(&v1));
}

#[tokio::test]
async fn covered_request_writes_nothing() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	let (reconciler, _) = reconciler(&api, 5);
	let v2 = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap().into_allow_list();
	let writes_before = api.writes();

	let outcome = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap();

	assert_eq!(outcome, Outcome::Unchanged(v2));
	assert_eq!(api.writes(), writes_before);
}

#[tokio::test]
async fn repeating_a_request_is_idempotent() {
	let api = Arc::new(MemoryApi::new());
	api.add_cluster("c1");
	let (reconciler, _) = reconciler(&api, 5);
	let req = request(&["10.0.0.0/24", "10.0.1.7"]).with_cluster("c1");

	let first = reconciler.reconcile(&req).await.unwrap();
	let writes_after_first = api.writes();
	let second = reconciler.reconcile(&req).await.unwrap();

	assert!(matches!(first, Outcome::Created(_)));
	assert_eq!(second, Outcome::Unchanged(first.into_allow_list()));
	assert_eq!(api.writes(), writes_after_first);
}

#[tokio::test]
async fn versions_increase_by_one() {
	let api = Arc::new(MemoryApi::new());
	api.add_cluster("c1");
	let (reconciler, _) = reconciler(&api, 5);

	let mut names = Vec::new();
	for (i, entry) in ["127.0.0.1/32", "127.0.0.2/32", "127.0.0.3/32"].into_iter().enumerate() {
		let req = if i == 0 { request(&[entry]).with_cluster("c1") } else { request(&[entry]) };
		names.push(reconciler.reconcile(&req).await.unwrap().into_allow_list().name);
	}

	assert_eq!(names, ["acct--v1", "acct--v2", "acct--v3"]);
	let latest = reconciler.latest("acct").await.unwrap().unwrap();
	assert_eq!(latest.entries, entries(&["127.0.0.1/32", "127.0.0.2/32", "127.0.0.3/32"]));
	assert_eq!(latest.cluster_ids, clusters(&["c1"]));
}

#[tokio::test]
async fn explicit_cluster_joins_existing_associations() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	api.add_cluster("c2");
	let (reconciler, _) = reconciler(&api, 5);

	let list = reconciler
		.reconcile(&request(&["127.0.0.1/32"]).with_cluster("c2"))
		.await
		.unwrap()
		.into_allow_list();

	assert_eq!(list.name, "acct--v2");
	assert_eq!(list.cluster_ids, clusters(&["c1", "c2"]));
}

#[tokio::test]
async fn strips_orphaned_versions_and_keeps_unrelated_lists() {
	let api = Arc::new(MemoryApi::new());
	let other = api.seed_list("office--v4", &["192.168.0.0/16"], &["c1"]);
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	api.seed_list("acct--v2", &["127.0.0.1/32"], &["c1"]);
	api.seed_list("acctbar--v7", &["127.0.0.9/32"], &["c1"]);
	let (reconciler, _) = reconciler(&api, 5);

	let list = reconciler.reconcile(&request(&["127.0.0.5/32"])).await.unwrap().into_allow_list();

	assert_eq!(list.name, "acct--v3");
	let committed = api.committed_associations(&"c1".into());
	assert_eq!(committed.len(), 3);
	assert!(committed.contains(&other));
	assert!(committed.contains(&list.id));
}

#[tokio::test]
async fn lagging_reads_converge_within_budget() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	api.set_stale_write_responses(true);
	api.set_read_lag(2);
	let (reconciler, sleeper) = reconciler(&api, 5);

	let outcome = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap();

	assert_eq!(outcome.allow_list().cluster_ids, clusters(&["c1"]));
	assert_eq!(sleeper.count(), 2);
	assert_eq!(sleeper.total(), Duration::from_secs(2));
}

#[tokio::test]
async fn stale_reads_exhaust_and_keep_created_version() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	api.set_stale_write_responses(true);
	api.set_read_lag(u32::MAX);
	let (reconciler, sleeper) = reconciler(&api, 3);

	let err = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap_err();

	let ReconcileError::Clusters(report) = err else {
		panic!("expected a cluster report, got {err:?}");
	};
	let created = report.allow_list.clone().expect("created list is reported");
	assert_eq!(created.name, "acct--v2");
	assert!(report.converged.is_empty());
	assert_eq!(
		report.failures,
		vec![ClusterError::Exhausted {
			cluster_id: "c1".into(),
			phase: SyncPhase::Read,
			target: ids(&[&created.id]),
			attempts: 3,
			last_error: None,
		}]
	);
	assert_eq!(sleeper.count(), 2);
	assert_eq!(api.list_names(), ["acct--v1", "acct--v2"]);
}

#[tokio::test]
async fn one_failing_cluster_does_not_mask_the_others() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1", "c2", "c3"]);
	api.fail_next_for(
		Op::WriteAssociations,
		"c2",
		ApiError::Status {
			status: 403,
			detail: "cluster is locked".into(),
		},
	);
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap_err();

	let ReconcileError::Clusters(report) = err else {
		panic!("expected a cluster report, got {err:?}");
	};
	let created = report.allow_list.as_ref().unwrap();
	assert_eq!(report.converged, clusters(&["c1", "c3"]));
	assert_eq!(report.failures.len(), 1);
	assert!(matches!(
		&report.failures[0],
		ClusterError::Rejected { cluster_id, phase: SyncPhase::Write, .. } if cluster_id.as_str() == "c2"
	));
	assert_eq!(api.committed_associations(&"c1".into()), ids(&[&created.id]));
	assert_eq!(api.committed_associations(&"c3".into()), ids(&[&created.id]));
	assert!(!api.committed_associations(&"c2".into()).contains(&created.id));
}

#[tokio::test]
async fn missing_cluster_is_reported_not_fatal() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler
		.reconcile(&request(&["127.0.0.1/32"]).with_cluster("ghost"))
		.await
		.unwrap_err();

	let ReconcileError::Clusters(report) = err else {
		panic!("expected a cluster report, got {err:?}");
	};
	assert_eq!(report.converged, clusters(&["c1"]));
	assert!(matches!(&report.failures[..], [ClusterError::Read { cluster_id, .. }] if cluster_id.as_str() == "ghost"));
}

#[tokio::test]
async fn transient_write_errors_are_retried() {
	let api = Arc::new(MemoryApi::new());
	api.add_cluster("c1");
	api.fail_next_for(Op::WriteAssociations, "c1", ApiError::Transport("connection reset".into()));
	api.fail_next_for(Op::WriteAssociations, "c1", ApiError::Status { status: 502, detail: "bad gateway".into() });
	let (reconciler, sleeper) = reconciler(&api, 5);

	let outcome = reconciler.reconcile(&request(&["127.0.0.1/32"]).with_cluster("c1")).await.unwrap();

	assert_eq!(outcome.allow_list().cluster_ids, clusters(&["c1"]));
	assert_eq!(api.writes().association_writes, 1);
	assert_eq!(sleeper.count(), 2);
}

#[tokio::test]
async fn failed_creation_is_not_retried() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	api.fail_next(Op::Create, ApiError::Transport("timed out".into()));
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap_err();

	assert!(matches!(err, ReconcileError::Create { ref name, .. } if name == "acct--v2"));
	assert_eq!(api.writes().total(), 0);
	assert_eq!(api.list_names(), ["acct--v1"]);
}

#[tokio::test]
async fn catalog_read_failure_aborts_before_writing() {
	let api = Arc::new(MemoryApi::new());
	api.add_cluster("c1");
	api.fail_next(Op::List, ApiError::NonJson {
		content_type: Some("text/html".into()),
		body: "<html>".into(),
	});
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler.reconcile(&request(&["127.0.0.1/32"]).with_cluster("c1")).await.unwrap_err();

	assert!(matches!(err, ReconcileError::CatalogRead(ApiError::NonJson { .. })));
	assert_eq!(api.writes().total(), 0);
}

#[tokio::test]
async fn inconsistent_catalog_is_fatal() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v99999999999999999999999", &["127.0.0.1/32"], &[]);
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap_err();

	assert!(matches!(err, ReconcileError::Catalog(_)));
	assert_eq!(api.writes().total(), 0);
}

#[tokio::test]
async fn maximal_version_is_fatal() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v18446744073709551615", &["127.0.0.1/32"], &["c1"]);
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap_err();

	assert!(matches!(err, ReconcileError::Catalog(CatalogError::VersionOverflow { .. })));
	assert_eq!(api.writes().total(), 0);
	assert_eq!(api.list_names(), ["acct--v18446744073709551615"]);
}

#[tokio::test]
async fn failed_read_back_keeps_created_version() {
	let api = Arc::new(MemoryApi::new());
	api.add_cluster("c1");
	api.fail_next(Op::Get, ApiError::Transport("connection reset".into()));
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler
		.reconcile(&request(&["127.0.0.1/32"]).with_cluster("c1"))
		.await
		.unwrap_err();

	let ReconcileError::Fetch { id, source } = err else {
		panic!("expected a fetch failure, got {err:?}");
	};
	assert_eq!(source, ApiError::Transport("connection reset".into()));
	assert_eq!(api.list_names(), ["acct--v1"]);
	assert_eq!(api.committed_associations(&"c1".into()), ids(&[&id]));
}

#[tokio::test]
async fn write_and_read_phases_spend_separate_budgets() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	api.set_stale_write_responses(true);
	api.set_read_lag(u32::MAX);
	for _ in 0..2 {
		api.fail_next_for(Op::WriteAssociations, "c1", ApiError::Transport("connection reset".into()));
	}
	let (reconciler, sleeper) = reconciler(&api, 3);

	let err = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap_err();

	let ReconcileError::Clusters(report) = err else {
		panic!("expected a cluster report, got {err:?}");
	};
	assert!(matches!(
		&report.failures[..],
		[ClusterError::Exhausted { phase: SyncPhase::Read, attempts: 3, .. }]
	));
	assert_eq!(api.writes().association_writes, 1);
	assert_eq!(sleeper.count(), 4);
	assert_eq!(sleeper.total(), Duration::from_secs(4));
}

#[tokio::test]
async fn purge_detaches_then_deletes_lineage() {
	let api = Arc::new(MemoryApi::new());
	let other = api.seed_list("office--v1", &["192.168.0.0/16"], &["c1"]);
	let v1 = api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1"]);
	let v2 = api.seed_list("acct--v2", &["127.0.0.1/32", "127.0.0.2/32"], &["c1", "c2"]);
	api.set_read_lag(1);
	api.set_stale_write_responses(true);
	let (reconciler, _) = reconciler(&api, 5);

	let report = reconciler.purge("acct").await.unwrap();

	assert_eq!(report.detached, clusters(&["c1", "c2"]));
	assert_eq!(report.deleted, ids(&[&v1, &v2]));
	assert_eq!(api.committed_associations(&"c1".into()), ids(&[&other]));
	assert!(api.committed_associations(&"c2".into()).is_empty());
	assert_eq!(api.list_names(), ["office--v1"]);
	assert!(reconciler.latest("acct").await.unwrap().is_none());
}

#[tokio::test]
async fn purge_keeps_lists_when_a_cluster_fails() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1", "c2"]);
	api.fail_next_for(Op::ReadAssociations, "c2", ApiError::Status { status: 404, detail: "gone".into() });
	let (reconciler, _) = reconciler(&api, 5);

	let err = reconciler.purge("acct").await.unwrap_err();

	let ReconcileError::Clusters(report) = err else {
		panic!("expected a cluster report, got {err:?}");
	};
	assert!(report.allow_list.is_none());
	assert_eq!(report.converged, clusters(&["c1"]));
	assert_eq!(api.writes().deletes, 0);
	assert_eq!(api.list_names(), ["acct--v1"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn clusters_converge_concurrently() {
	let api = Arc::new(MemoryApi::new());
	api.seed_list("acct--v1", &["127.0.0.1/32"], &["c1", "c2", "c3", "c4", "c5"]);
	api.set_stale_write_responses(true);
	api.set_read_lag(3);
	let reconciler = Reconciler::new(Arc::clone(&api), ReconcileConfig {
		max_attempts: 10,
		interval: Duration::from_secs(1),
	});

	let start = tokio::time::Instant::now();
	let list = reconciler.reconcile(&request(&["127.0.0.2/32"])).await.unwrap().into_allow_list();
	let elapsed = start.elapsed();

	assert_eq!(list.cluster_ids, clusters(&["c1", "c2", "c3", "c4", "c5"]));
	assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
	assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
}
