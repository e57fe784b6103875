//! Version parsing and latest-version resolution.

use std::collections::BTreeSet;

use tracing::warn;

use crate::error::CatalogError;
use crate::model::{AllowList, AllowListId};

/// Separator between a prefix and its version number.
pub const VERSION_DELIMITER: &str = "--v";

/// Extracts the version of `name` if it is exactly `<prefix>--v<digits>`.
///
/// Returns `Ok(None)` for names of other lineages, including names that merely
/// start with `prefix` (`foo` never matches `foobar--v1`). Digits that do not
/// fit a version number are a catalog inconsistency.
pub fn parse_versioned_name(name: &str, prefix: &str) -> Result<Option<u64>, CatalogError> {
	let Some(digits) = name.strip_prefix(prefix).and_then(|rest| rest.strip_prefix(VERSION_DELIMITER)) else {
		return Ok(None);
	};
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return Ok(None);
	}
	digits.parse::<u64>().map(Some).map_err(|_| CatalogError::InvalidVersion {
		name: name.to_owned(),
		prefix: prefix.to_owned(),
		digits: digits.to_owned(),
	})
}

/// A catalog list belonging to the resolved lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedList<'a> {
	pub version: u64,
	pub list: &'a AllowList,
}

/// Every version of one prefix found in a catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'a> {
	matches: Vec<VersionedList<'a>>,
	latest: Option<usize>,
}

impl<'a> Resolution<'a> {
	/// Lists of this prefix in catalog order.
	pub fn matches(&self) -> &[VersionedList<'a>] {
		&self.matches
	}

	/// Highest version, if any list matched.
	pub fn latest(&self) -> Option<VersionedList<'a>> {
		self.latest.map(|idx| self.matches[idx])
	}

	/// Ids of every matched list, the latest included.
	pub fn obsolete_ids(&self) -> BTreeSet<AllowListId> {
		self.matches.iter().map(|m| m.list.id.clone()).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.matches.is_empty()
	}
}

/// Resolves the lineage of `prefix` within `catalog`.
///
/// Two lists sharing the highest version should not exist; if they do, the
/// first one in catalog order wins and a warning is logged.
pub fn resolve<'a>(prefix: &str, catalog: &'a [AllowList]) -> Result<Resolution<'a>, CatalogError> {
	let mut matches = Vec::new();
	let mut latest: Option<usize> = None;

	for list in catalog {
		let Some(version) = parse_versioned_name(&list.name, prefix)? else {
			continue;
		};
		match latest.map(|idx| matches[idx]) {
			Some(VersionedList { version: best, list: current }) if version == best => {
				warn!(prefix, version, kept = %current.id, ignored = %list.id, "allowlist.version.tie");
			}
			Some(VersionedList { version: best, .. }) if version < best => {}
			_ => latest = Some(matches.len()),
		}
		matches.push(VersionedList { version, list });
	}

	Ok(Resolution { matches, latest })
}
