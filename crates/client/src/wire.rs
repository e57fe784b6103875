//! JSON shapes of the public API.
//!
//! Every response is wrapped in an envelope carrying either `data` or an
//! `error`. Allow-list resources split into a user-supplied `spec` and a
//! server-assigned `info` block.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use ybm_allowlist::entry::normalize_catalog_entry;
use ybm_allowlist::{AllowList, AllowListId, ApiError, ClusterId};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
	data: Option<T>,
	#[serde(default)]
	error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
	#[serde(default)]
	status: Option<u16>,
	#[serde(default)]
	detail: Option<String>,
}

/// Server-assigned ids have been observed both as strings and as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
	Text(String),
	Number(u64),
}

impl WireId {
	fn into_id(self) -> Option<AllowListId> {
		match self {
			Self::Text(text) if text.trim().is_empty() => None,
			Self::Text(text) => Some(AllowListId::new(text)),
			Self::Number(number) => Some(AllowListId::new(number.to_string())),
		}
	}
}

#[derive(Debug, Deserialize)]
struct WireInfo {
	#[serde(default)]
	id: Option<WireId>,
	#[serde(default)]
	cluster_ids: Option<Vec<String>>,
}

impl WireInfo {
	fn id(&mut self) -> Result<AllowListId, ApiError> {
		self.id
			.take()
			.and_then(WireId::into_id)
			.ok_or(ApiError::MissingField("info.id"))
	}
}

#[derive(Debug, Deserialize)]
struct WireSpec {
	name: String,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	allow_list: Option<Vec<String>>,
}

/// A full allow-list resource.
#[derive(Debug, Deserialize)]
pub(crate) struct WireAllowList {
	spec: WireSpec,
	info: WireInfo,
}

impl TryFrom<WireAllowList> for AllowList {
	type Error = ApiError;

	fn try_from(mut wire: WireAllowList) -> Result<Self, Self::Error> {
		let id = wire.info.id()?;
		Ok(Self {
			id,
			name: wire.spec.name,
			description: wire.spec.description.unwrap_or_default(),
			entries: wire
				.spec
				.allow_list
				.unwrap_or_default()
				.iter()
				.map(|entry| normalize_catalog_entry(entry))
				.collect(),
			cluster_ids: wire.info.cluster_ids.unwrap_or_default().into_iter().map(ClusterId::new).collect(),
		})
	}
}

/// An allow-list resource read only for its id, as returned by the cluster
/// association endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct WireAllowListRef {
	info: WireInfo,
}

impl WireAllowListRef {
	pub(crate) fn into_id(mut self) -> Result<AllowListId, ApiError> {
		self.info.id()
	}
}

/// Decodes the `data` member of an enveloped response.
pub(crate) fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
	let envelope: Envelope<T> = serde_json::from_str(text).map_err(|err| ApiError::Malformed(err.to_string()))?;
	match envelope {
		Envelope { data: Some(data), .. } => Ok(data),
		Envelope { error: Some(error), .. } => Err(ApiError::Malformed(format!(
			"error envelope on success status: {}",
			error.detail.unwrap_or_default()
		))),
		Envelope { .. } => Err(ApiError::MissingField("data")),
	}
}

/// Error detail of a failed response, falling back to the raw body.
pub(crate) fn error_detail(text: &str) -> String {
	serde_json::from_str::<Envelope<serde_json::Value>>(text)
		.ok()
		.and_then(|envelope| envelope.error)
		.and_then(|error| match (error.detail, error.status) {
			(Some(detail), _) => Some(detail),
			(None, Some(status)) => Some(format!("status {status}")),
			(None, None) => None,
		})
		.unwrap_or_else(|| excerpt(text))
}

/// Leading part of a body, for error reporting.
pub(crate) fn excerpt(text: &str) -> String {
	const LIMIT: usize = 512;
	match text.char_indices().nth(LIMIT) {
		Some((cut, _)) => format!("{}...", &text[..cut]),
		None => text.to_owned(),
	}
}
