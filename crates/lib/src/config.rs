//! Configuration for shard term handles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_retry_timeout_ms() -> u64 {
    30_000
}

fn default_notify_on_local_write() -> bool {
    true
}

/// Tuning for a [`ShardTerms`](crate::ShardTerms) handle.
///
/// # Example
///
/// ```
/// use shard_terms::ShardTermsConfig;
///
/// let config = ShardTermsConfig {
///     retry_timeout_ms: 5_000,
///     ..Default::default()
/// };
/// assert!(config.notify_on_local_write);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTermsConfig {
    /// How long a mutation may keep retrying on version conflicts before it
    /// fails with a timeout. Should match the store session timeout.
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,

    /// Pause between conflicting attempts. Zero only yields to the scheduler.
    #[serde(default)]
    pub conflict_backoff_ms: u64,

    /// Deliver a successful local write to listeners straight away instead
    /// of waiting for the watch to report it.
    #[serde(default = "default_notify_on_local_write")]
    pub notify_on_local_write: bool,
}

impl Default for ShardTermsConfig {
    fn default() -> Self {
        Self {
            retry_timeout_ms: default_retry_timeout_ms(),
            conflict_backoff_ms: 0,
            notify_on_local_write: default_notify_on_local_write(),
        }
    }
}

impl ShardTermsConfig {
    /// The retry budget as a [`Duration`].
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// The conflict backoff as a [`Duration`].
    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}
