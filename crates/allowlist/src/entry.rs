//! Normalization of allow-list entries.
//!
//! Entries are compared as strings, so `10.0.0.1` and `10.0.0.1/32` must
//! collapse to one spelling before any set arithmetic happens.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::EntryError;

/// Normalizes a requested entry to canonical CIDR notation.
///
/// Bare addresses become host networks (`/32` or `/128`). Host bits of a
/// network are preserved, only the spelling changes.
pub fn normalize_entry(raw: &str) -> Result<String, EntryError> {
	let trimmed = raw.trim();
	if let Ok(net) = trimmed.parse::<IpNet>() {
		return Ok(net.to_string());
	}
	if let Ok(addr) = trimmed.parse::<IpAddr>() {
		return Ok(IpNet::from(addr).to_string());
	}
	Err(EntryError::Invalid(trimmed.to_owned()))
}

/// Normalizes an entry read back from the remote catalog.
///
/// The remote side may hold spellings this crate would reject; those are kept
/// verbatim (trimmed) so they survive into the next version untouched.
pub fn normalize_catalog_entry(raw: &str) -> String {
	normalize_entry(raw).unwrap_or_else(|_| raw.trim().to_owned())
}
