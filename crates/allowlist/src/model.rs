//! Allow-list domain types.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry::normalize_entry;
use crate::error::EntryError;

macro_rules! opaque_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Wraps a remote identifier.
			pub fn new(id: impl Into<String>) -> Self {
				Self(id.into())
			}

			/// Returns the identifier as sent over the wire.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl From<&str> for $name {
			fn from(id: &str) -> Self {
				Self::new(id)
			}
		}

		impl From<String> for $name {
			fn from(id: String) -> Self {
				Self(id)
			}
		}
	};
}

opaque_id! {
	/// Remote-assigned identifier of an allow-list.
	AllowListId
}

opaque_id! {
	/// Identifier of a managed database cluster.
	ClusterId
}

/// One immutable version of an allow-list lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowList {
	/// Remote identifier.
	pub id: AllowListId,
	/// Versioned name, `<prefix>--v<N>` for lists managed by this crate.
	pub name: String,
	/// Human readable description.
	pub description: String,
	/// Normalized CIDR entries.
	pub entries: BTreeSet<String>,
	/// Clusters currently associated with this list.
	pub cluster_ids: BTreeSet<ClusterId>,
}

/// Body of an allow-list creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAllowList {
	pub name: String,
	pub description: String,
	pub entries: BTreeSet<String>,
}

/// A single update request for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationRequest {
	/// Lineage name root.
	pub prefix: String,
	/// Normalized entries that must be permitted.
	pub entries: BTreeSet<String>,
	/// Cluster that must end up associated with the latest version.
	pub cluster_id: Option<ClusterId>,
}

impl ReconciliationRequest {
	/// Builds a request, normalizing every entry.
	///
	/// Fails on the first entry that is neither an IP address nor a CIDR block.
	pub fn new<I, S>(prefix: impl Into<String>, entries: I) -> Result<Self, EntryError>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let entries = entries
			.into_iter()
			.map(|entry| normalize_entry(entry.as_ref()))
			.collect::<Result<BTreeSet<_>, _>>()?;
		Ok(Self {
			prefix: prefix.into(),
			entries,
			cluster_id: None,
		})
	}

	/// Requests that `cluster_id` is associated with the resulting list.
	pub fn with_cluster(mut self, cluster_id: impl Into<ClusterId>) -> Self {
		self.cluster_id = Some(cluster_id.into());
		self
	}
}

/// Everything the side-effecting phase needs, derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationPlan {
	pub next_version: u64,
	pub next_version_name: String,
	pub description: String,
	pub merged_entries: BTreeSet<String>,
	/// Explicit cluster plus every cluster of the previous latest version.
	pub affected_cluster_ids: BTreeSet<ClusterId>,
	/// Ids of every list of this prefix seen at resolution time.
	pub obsolete_list_ids: BTreeSet<AllowListId>,
}

impl ReconciliationPlan {
	/// Creation body for the next version.
	pub fn new_allow_list(&self) -> NewAllowList {
		NewAllowList {
			name: self.next_version_name.clone(),
			description: self.description.clone(),
			entries: self.merged_entries.clone(),
		}
	}
}

/// Renders an id set as a comma-separated list.
pub(crate) fn join_ids<T: fmt::Display>(ids: &BTreeSet<T>) -> String {
	ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}
