//! Error types for allow-list reconciliation.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::model::{AllowList, AllowListId, ClusterId, join_ids};

/// Errors reported by an [`AllowListApi`](crate::AllowListApi) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
	/// The request never produced a response.
	#[error("transport error: {0}")]
	Transport(String),

	/// The remote side answered with a non-success status.
	#[error("remote returned status {status}: {detail}")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Error detail reported by the remote side.
		detail: String,
	},

	/// The response body was not JSON.
	#[error("non-JSON response (content type {content_type:?})")]
	NonJson {
		/// Content type header of the response, if any.
		content_type: Option<String>,
		/// Leading part of the response body.
		body: String,
	},

	/// The response was JSON but did not have the expected shape.
	#[error("malformed response: {0}")]
	Malformed(String),

	/// A field the contract requires was absent from a structured response.
	#[error("response is missing required field `{0}`")]
	MissingField(&'static str),
}

impl ApiError {
	/// Whether retrying the same call may succeed.
	///
	/// Network failures, throttling, server errors and unstructured bodies are
	/// transient. Client errors and contract violations are not.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Transport(_) | Self::NonJson { .. } | Self::Malformed(_) => true,
			Self::Status { status, .. } => *status == 429 || *status >= 500,
			Self::MissingField(_) => false,
		}
	}
}

/// A requested entry is neither an IP address nor a CIDR block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
	#[error("invalid allow-list entry `{0}`: expected an IP address or CIDR block")]
	Invalid(String),
}

/// The remote catalog violates the versioning invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
	/// A name matched `<prefix>--v<digits>` but the digits are not a version.
	#[error("allow list `{name}` matches prefix `{prefix}` but `{digits}` is not a valid version number")]
	InvalidVersion { name: String, prefix: String, digits: String },

	/// The latest version is the largest representable one, so no next
	/// version exists.
	#[error("allow list `{name}` of prefix `{prefix}` holds the largest possible version")]
	VersionOverflow { name: String, prefix: String },
}

/// Which half of a cluster synchronization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	/// Issuing the association write.
	Write,
	/// Waiting for reads to reflect the write.
	Read,
}

impl fmt::Display for SyncPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Write => "write",
			Self::Read => "read",
		})
	}
}

/// Terminal failure of one cluster's association update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
	/// The cluster's current associations could not be read.
	#[error("cluster {cluster_id}: failed to read current allow lists: {source}")]
	Read {
		cluster_id: ClusterId,
		#[source]
		source: ApiError,
	},

	/// The target state was not observed within the attempt budget.
	#[error("cluster {cluster_id}: {phase} of allow lists [{}] did not converge after {attempts} attempts", join_ids(.target))]
	Exhausted {
		cluster_id: ClusterId,
		phase: SyncPhase,
		target: BTreeSet<AllowListId>,
		attempts: u32,
		/// Last transient error seen, if the final attempts failed outright.
		last_error: Option<ApiError>,
	},

	/// The remote side rejected the update with a non-retryable error.
	#[error("cluster {cluster_id}: {phase} of allow lists [{}] rejected: {source}", join_ids(.target))]
	Rejected {
		cluster_id: ClusterId,
		phase: SyncPhase,
		target: BTreeSet<AllowListId>,
		#[source]
		source: ApiError,
	},

	/// The per-cluster task ended without reporting a result.
	#[error("cluster {cluster_id}: update task aborted: {reason}")]
	Aborted { cluster_id: ClusterId, reason: String },
}

impl ClusterError {
	/// Cluster the failure belongs to.
	pub fn cluster_id(&self) -> &ClusterId {
		match self {
			Self::Read { cluster_id, .. }
			| Self::Exhausted { cluster_id, .. }
			| Self::Rejected { cluster_id, .. }
			| Self::Aborted { cluster_id, .. } => cluster_id,
		}
	}
}

/// Outcome of a fan-out in which at least one cluster failed.
///
/// Converged clusters keep their new associations; nothing is rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterReport {
	/// List the clusters were being moved onto, absent when detaching.
	pub allow_list: Option<AllowList>,
	/// Clusters whose associations reached the target state.
	pub converged: BTreeSet<ClusterId>,
	/// Every failed cluster, ordered by cluster id.
	pub failures: Vec<ClusterError>,
}

impl fmt::Display for ClusterReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let total = self.converged.len() + self.failures.len();
		write!(f, "{} of {total} clusters failed", self.failures.len())?;
		if let Some(list) = &self.allow_list {
			write!(f, " to move onto allow list {} ({})", list.name, list.id)?;
		}
		for failure in &self.failures {
			write!(f, "; {failure}")?;
		}
		Ok(())
	}
}

/// Errors that abort a reconciliation or purge pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error(transparent)]
	Entry(#[from] EntryError),

	#[error(transparent)]
	Catalog(#[from] CatalogError),

	/// A read that feeds a decision failed; nothing was written.
	#[error("failed to read the allow-list catalog: {0}")]
	CatalogRead(#[source] ApiError),

	/// Creation failed. Creation is never retried.
	#[error("failed to create allow list `{name}`: {source}")]
	Create {
		name: String,
		#[source]
		source: ApiError,
	},

	/// Some clusters did not converge.
	#[error("{0}")]
	Clusters(ClusterReport),

	/// The created list could not be read back.
	#[error("failed to fetch allow list {id}: {source}")]
	Fetch {
		id: AllowListId,
		#[source]
		source: ApiError,
	},

	/// A list could not be deleted during a purge.
	#[error("failed to delete allow list {id}: {source}")]
	Delete {
		id: AllowListId,
		#[source]
		source: ApiError,
	},
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
