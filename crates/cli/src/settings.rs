//! Connection and retry settings.
//!
//! Values come from an optional TOML file, overridden field by field by
//! command line flags and their environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use ybm_allowlist::ReconcileConfig;
use ybm_allowlist_client::ClientConfig;

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading the settings file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax.
	#[error("invalid settings file: {0}")]
	Toml(#[from] toml::de::Error),

	/// A required setting was given nowhere.
	#[error("missing required setting `{0}` (set it in the settings file, by flag or by environment)")]
	Missing(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Flags shared by every subcommand, each backed by an environment variable.
#[derive(clap::Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
	/// API key used as bearer token
	#[arg(long, env = "YBM_API_KEY", hide_env_values = true, global = true)]
	pub api_key: Option<String>,

	/// Account id
	#[arg(long, env = "YBM_ACCOUNT_ID", global = true)]
	pub account_id: Option<String>,

	/// Project id
	#[arg(long, env = "YBM_PROJECT_ID", global = true)]
	pub project_id: Option<String>,

	/// API endpoint
	#[arg(long, env = "YBM_ENDPOINT", global = true)]
	pub endpoint: Option<String>,

	/// Attempts per convergence poll
	#[arg(long, env = "YBM_MAX_RETRY", value_name = "N", global = true)]
	pub max_retry: Option<u32>,

	/// Seconds between convergence attempts
	#[arg(long, env = "YBM_RETRY_INTERVAL", value_name = "SECONDS", global = true)]
	pub retry_interval: Option<u64>,

	/// Per-request timeout in seconds
	#[arg(long, value_name = "SECONDS", global = true)]
	pub request_timeout: Option<u64>,
}

/// Contents of a settings file. Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
	pub api_key: Option<String>,
	pub account_id: Option<String>,
	pub project_id: Option<String>,
	pub endpoint: Option<String>,
	pub max_retry: Option<u32>,
	/// Seconds.
	pub retry_interval: Option<u64>,
	/// Seconds.
	pub request_timeout: Option<u64>,
}

impl Settings {
	/// Reads a settings file.
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_owned(),
			error,
		})?;
		Ok(toml::from_str(&text)?)
	}

	/// Applies `overrides` on top of these settings.
	pub fn merge(self, overrides: &Overrides) -> Self {
		fn pick<T: Clone>(over: &Option<T>, base: Option<T>) -> Option<T> {
			over.clone().or(base)
		}
		Self {
			api_key: pick(&overrides.api_key, self.api_key),
			account_id: pick(&overrides.account_id, self.account_id),
			project_id: pick(&overrides.project_id, self.project_id),
			endpoint: pick(&overrides.endpoint, self.endpoint),
			max_retry: pick(&overrides.max_retry, self.max_retry),
			retry_interval: pick(&overrides.retry_interval, self.retry_interval),
			request_timeout: pick(&overrides.request_timeout, self.request_timeout),
		}
	}

	pub fn client_config(&self) -> Result<ClientConfig> {
		let mut config = ClientConfig::new(
			required(&self.account_id, "account_id")?,
			required(&self.project_id, "project_id")?,
			required(&self.api_key, "api_key")?,
		);
		if let Some(endpoint) = present(&self.endpoint) {
			config = config.with_endpoint(endpoint);
		}
		if let Some(secs) = self.request_timeout {
			config = config.with_request_timeout(Duration::from_secs(secs));
		}
		Ok(config)
	}

	pub fn reconcile_config(&self) -> ReconcileConfig {
		let defaults = ReconcileConfig::default();
		ReconcileConfig {
			max_attempts: self.max_retry.unwrap_or(defaults.max_attempts),
			interval: self.retry_interval.map(Duration::from_secs).unwrap_or(defaults.interval),
		}
	}
}

/// Blank values count as unset.
fn present(value: &Option<String>) -> Option<&str> {
	value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str> {
	present(value).ok_or(ConfigError::Missing(name))
}
