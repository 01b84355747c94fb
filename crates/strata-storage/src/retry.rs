//! Timeout and bounded exponential backoff around backend calls

use std::future::Future;
use std::time::Duration;
use strata_core::{StrataError, StrataResult};
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Applied to every individual attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &strata_core::config::TransferConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            timeout: Duration::from_secs(cfg.io_timeout_secs),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    /// Run `f` until it succeeds, fails permanently, or the retry budget is spent.
    ///
    /// A timed-out attempt counts as a transient failure.
    pub async fn run<T, F, Fut>(&self, account_id: &str, what: &str, mut f: F) -> StrataResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StrataResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(StrataError::transient(
                    account_id,
                    format!("{what} timed out after {:?}", self.timeout),
                )),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        account = %account_id,
                        op = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
