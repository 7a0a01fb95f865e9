//! Bounded retries with per-call timeouts for sink calls

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::SinkError;

/// Retry budget applied to every collaborator call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Timeout for a single attempt in milliseconds
    pub call_timeout_ms: u64,
    /// Attempts after the first one
    pub max_retries: u32,
    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            max_retries: 2,
            retry_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self {
            call_timeout_ms: call_timeout.as_millis() as u64,
            max_retries: 0,
            retry_delay_ms: 0,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Run `call` until it succeeds or the budget is spent
    ///
    /// A timed out attempt counts as a failed attempt. The last error is returned.
    pub async fn run<F, Fut>(&self, sink: &'static str, mut call: F) -> Result<(), SinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), SinkError>>,
    {
        let timeout = self.call_timeout();
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout { sink, timeout }),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(sink = sink, attempt = attempt, error = %e, "Retrying sink call");
                    tokio::time::sleep(self.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
