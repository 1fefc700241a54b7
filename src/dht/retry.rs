use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use super::DhtError;

/// Exponential retry schedule for DHT lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            attempts: 8,
        }
    }
}

impl RetryPolicy {
    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)))
            .with_max_times(self.attempts)
    }
}

/// Run a lookup until it yields a value, retrying misses and transport
/// errors on the policy's schedule. Other errors return immediately.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut lookup: F) -> Result<T, DhtError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, DhtError>>,
{
    let attempt = || {
        let pending = lookup();
        async move { pending.await?.ok_or(DhtError::NotFound) }
    };
    attempt
        .retry(&policy.builder())
        .when(DhtError::is_retryable)
        .notify(|err, delay| trace!(%err, ?delay, "retrying DHT lookup"))
        .await
}
