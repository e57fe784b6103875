//! HTTP client for the YugabyteDB Managed public API.
//!
//! [`YbmClient`] implements [`ybm_allowlist::AllowListApi`] on top of the
//! `public/v1` allow-list and cluster endpoints of one account and project.

mod client;
mod config;
mod wire;

pub use client::YbmClient;
pub use config::{ClientConfig, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};
