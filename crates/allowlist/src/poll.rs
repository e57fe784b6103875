//! Bounded polling for eventually consistent reads and writes.
//!
//! Every attempt, whether it failed transiently or simply did not observe the
//! expected state yet, consumes one unit of the budget and is followed by a
//! constant sleep. A pass therefore costs at most `max_attempts * interval`
//! of waiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Source of the delay between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
	async fn sleep(&self, duration: Duration);
}

/// Sleeps on the Tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

/// Attempt budget and spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
	/// Upper bound on attempts. Zero is treated as one.
	pub max_attempts: u32,
	/// Constant delay between attempts.
	pub interval: Duration,
}

/// Why polling stopped without observing the expected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
	/// The budget ran out.
	Exhausted {
		attempts: u32,
		/// Error of the final attempt, if it failed outright.
		last_error: Option<ApiError>,
	},
	/// A non-transient error ended polling early.
	Fatal(ApiError),
}

/// Runs a check until it reports success or the budget is spent.
#[derive(Clone)]
pub struct ConvergencePoller {
	policy: PollPolicy,
	sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for ConvergencePoller {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConvergencePoller").field("policy", &self.policy).finish_non_exhaustive()
	}
}

impl ConvergencePoller {
	/// Creates a poller sleeping on the Tokio timer.
	pub fn new(policy: PollPolicy) -> Self {
		Self::with_sleeper(policy, Arc::new(TokioSleeper))
	}

	/// Creates a poller with a custom sleep source.
	pub fn with_sleeper(policy: PollPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
		Self { policy, sleeper }
	}

	pub fn policy(&self) -> PollPolicy {
		self.policy
	}

	/// Polls `check` until it yields `Ok(Some(_))`.
	///
	/// `check` receives the 1-based attempt number. `Ok(None)` means the
	/// expected state is not visible yet; transient errors are logged and count
	/// as a failed attempt; any other error is returned immediately.
	pub async fn poll<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T, PollError>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<Option<T>, ApiError>>,
	{
		let max_attempts = self.policy.max_attempts.max(1);
		let mut last_error = None;

		for attempt in 1..=max_attempts {
			match check(attempt).await {
				Ok(Some(value)) => {
					debug!(what, attempt, "allowlist.poll.converged");
					return Ok(value);
				}
				Ok(None) => {
					debug!(what, attempt, max_attempts, "allowlist.poll.pending");
					last_error = None;
				}
				Err(err) if err.is_transient() => {
					warn!(what, attempt, max_attempts, error = %err, "allowlist.poll.transient_error");
					last_error = Some(err);
				}
				Err(err) => return Err(PollError::Fatal(err)),
			}

			if attempt < max_attempts {
				self.sleeper.sleep(self.policy.interval).await;
			}
		}

		Err(PollError::Exhausted {
			attempts: max_attempts,
			last_error,
		})
	}
}
