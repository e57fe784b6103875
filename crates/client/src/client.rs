//! Authenticated requests against one account and project.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use ybm_allowlist::{AllowList, AllowListApi, AllowListId, ApiError, ClusterId, NewAllowList};

use crate::config::ClientConfig;
use crate::wire::{self, WireAllowList, WireAllowListRef};

const JSON: &str = "application/json";

/// Catalog query: user-created lists only, in one page.
const LIST_QUERY: [(&str, &str); 3] = [("order_by", "name"), ("limit", "1000"), ("is_auto_created", "false")];

/// Client for the allow-list endpoints.
#[derive(Clone)]
pub struct YbmClient {
	client: Client,
	api_root: String,
	api_key: String,
}

impl std::fmt::Debug for YbmClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("YbmClient").field("api_root", &self.api_root).finish_non_exhaustive()
	}
}

impl YbmClient {
	/// Create a new client from `config`.
	pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
		let client = Client::builder()
			.timeout(config.request_timeout)
			.build()
			.map_err(|e| ApiError::Transport(e.to_string()))?;

		Ok(Self {
			client,
			api_root: config.api_root(),
			api_key: config.api_key.clone(),
		})
	}

	/// Sends one request and returns its body.
	///
	/// `None` means an empty acknowledgement of a `DELETE`. Any other body
	/// must be JSON.
	async fn send(
		&self,
		method: Method,
		path: &str,
		query: &[(&str, &str)],
		body: Option<serde_json::Value>,
	) -> Result<Option<String>, ApiError> {
		let url = format!("{}{path}", self.api_root);
		debug!(%method, %url, "ybm.request");

		let mut request = self
			.client
			.request(method.clone(), &url)
			.bearer_auth(&self.api_key)
			.header(ACCEPT, JSON)
			.header(CONTENT_TYPE, JSON);
		if !query.is_empty() {
			request = request.query(query);
		}
		if let Some(body) = &body {
			request = request.json(body);
		}

		let response = request.send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
		let status = response.status();
		let content_type = response
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|value| value.to_str().ok())
			.map(str::to_owned);
		let text = response.text().await.map_err(|e| ApiError::Transport(e.to_string()))?;
		debug!(%method, %url, status = status.as_u16(), bytes = text.len(), "ybm.response");

		if !status.is_success() {
			return Err(ApiError::Status {
				status: status.as_u16(),
				detail: wire::error_detail(&text),
			});
		}

		let is_json = content_type.as_deref().is_some_and(|value| value.contains(JSON));
		if is_json {
			return Ok(Some(text));
		}
		if method == Method::DELETE && text.is_empty() {
			return Ok(None);
		}

		warn!(%method, %url, content_type = ?content_type, "ybm.response.non_json");
		Err(ApiError::NonJson {
			content_type,
			body: wire::excerpt(&text),
		})
	}

	async fn fetch<T: DeserializeOwned>(
		&self,
		method: Method,
		path: &str,
		query: &[(&str, &str)],
		body: Option<serde_json::Value>,
	) -> Result<T, ApiError> {
		let text = self
			.send(method, path, query, body)
			.await?
			.ok_or_else(|| ApiError::Malformed("empty response body".into()))?;
		wire::decode(&text)
	}

	async fn association_ids(
		&self,
		method: Method,
		cluster_id: &ClusterId,
		body: Option<serde_json::Value>,
	) -> Result<BTreeSet<AllowListId>, ApiError> {
		let path = format!("/clusters/{cluster_id}/allow-lists");
		let refs: Vec<WireAllowListRef> = self.fetch(method, &path, &[], body).await?;
		refs.into_iter().map(WireAllowListRef::into_id).collect()
	}
}

#[async_trait]
impl AllowListApi for YbmClient {
	async fn list_allow_lists(&self) -> Result<Vec<AllowList>, ApiError> {
		let lists: Vec<WireAllowList> = self.fetch(Method::GET, "/allow-lists", &LIST_QUERY, None).await?;
		lists.into_iter().map(AllowList::try_from).collect()
	}

	async fn get_allow_list(&self, id: &AllowListId) -> Result<AllowList, ApiError> {
		let list: WireAllowList = self.fetch(Method::GET, &format!("/allow-lists/{id}"), &[], None).await?;
		AllowList::try_from(list)
	}

	async fn create_allow_list(&self, list: &NewAllowList) -> Result<AllowList, ApiError> {
		let body = json!({
			"name": list.name,
			"description": list.description,
			"allow_list": list.entries,
		});
		let created: WireAllowList = self.fetch(Method::POST, "/allow-lists", &[], Some(body)).await?;
		AllowList::try_from(created)
	}

	async fn cluster_allow_list_ids(&self, cluster_id: &ClusterId) -> Result<BTreeSet<AllowListId>, ApiError> {
		self.association_ids(Method::GET, cluster_id, None).await
	}

	async fn set_cluster_allow_list_ids(
		&self,
		cluster_id: &ClusterId,
		ids: &BTreeSet<AllowListId>,
	) -> Result<BTreeSet<AllowListId>, ApiError> {
		self.association_ids(Method::PUT, cluster_id, Some(json!(ids))).await
	}

	async fn delete_allow_list(&self, id: &AllowListId) -> Result<(), ApiError> {
		self.send(Method::DELETE, &format!("/allow-lists/{id}"), &[], None).await?;
		Ok(())
	}
}
