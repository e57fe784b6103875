//! Names and descriptions of new versions.

use std::collections::BTreeSet;

use crate::version::VERSION_DELIMITER;

/// Name of version `version` of `prefix`.
///
/// The prefix is not validated here; callers must not pass one that already
/// ends in a versioned suffix.
pub fn versioned_name(prefix: &str, version: u64) -> String {
	format!("{prefix}{VERSION_DELIMITER}{version}")
}

/// Description listing every entry of a version.
pub fn describe(entries: &BTreeSet<String>) -> String {
	let joined = entries.iter().map(String::as_str).collect::<Vec<_>>().join(",");
	format!("Allow list for {joined}")
}
