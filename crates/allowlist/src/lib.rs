//! Versioned allow-list reconciliation for managed database clusters.
//!
//! An allow-list lineage is a family of remote lists sharing a name prefix,
//! one list per version (`<prefix>--v<N>`). Lists are never mutated: adding
//! entries creates the next version holding the union of old and new entries,
//! and every cluster that referenced an older version is re-pointed at it.
//!
//! * [`version`]: parses versioned names and resolves the latest list
//! * [`merge`]: no-op decision and additive entry merge
//! * [`naming`]: next version name and description
//! * [`plan`]: per-cluster association targets
//! * [`poll`]: bounded constant-interval convergence polling
//! * [`reconcile`]: the [`Reconciler`] driving the whole pass
//!
//! The remote store is reached only through [`AllowListApi`], so the HTTP
//! client lives in a separate crate and tests run against `memory::MemoryApi`
//! (enabled by the `test-support` feature).

pub mod api;
pub mod entry;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod merge;
pub mod model;
pub mod naming;
pub mod plan;
pub mod poll;
mod purge;
pub mod reconcile;
pub mod version;

pub use api::AllowListApi;
pub use error::{ApiError, CatalogError, ClusterError, ClusterReport, EntryError, ReconcileError, Result, SyncPhase};
pub use model::{AllowList, AllowListId, ClusterId, NewAllowList, ReconciliationPlan, ReconciliationRequest};
pub use poll::{ConvergencePoller, PollError, PollPolicy, Sleeper, TokioSleeper};
pub use purge::PurgeReport;
pub use reconcile::{Outcome, ReconcileConfig, Reconciler};
