use std::fmt;
use std::time::Duration;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://cloud.yugabyte.com/api";

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one account and project.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
	/// API endpoint, without the `public/v1` suffix.
	pub endpoint: String,
	pub account_id: String,
	pub project_id: String,
	/// Bearer token sent with every request.
	pub api_key: String,
	pub request_timeout: Duration,
}

impl ClientConfig {
	/// Settings for the default endpoint and timeout.
	pub fn new(account_id: impl Into<String>, project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
		Self {
			endpoint: DEFAULT_ENDPOINT.to_owned(),
			account_id: account_id.into(),
			project_id: project_id.into(),
			api_key: api_key.into(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// Root every resource path is appended to.
	pub fn api_root(&self) -> String {
		format!(
			"{}/public/v1/accounts/{}/projects/{}",
			self.endpoint.trim_end_matches('/'),
			self.account_id,
			self.project_id
		)
	}
}

impl fmt::Debug for ClientConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClientConfig")
			.field("endpoint", &self.endpoint)
			.field("account_id", &self.account_id)
			.field("project_id", &self.project_id)
			.field("api_key", &"<redacted>")
			.field("request_timeout", &self.request_timeout)
			.finish()
	}
}
