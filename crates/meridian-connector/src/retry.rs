// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry for connector I/O.

use std::future::Future;
use std::time::Duration;

use meridian_config::model::DatabaseSourceConfig;
use tracing::warn;

/// `retry_count` retries after the first attempt, `retry_interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_interval: Duration,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, retry_interval: Duration) -> Self {
        Self {
            retry_count,
            retry_interval,
        }
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Runs `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. On exhaustion the last error
    /// is returned together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, (E, u32)>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max => return Err((e, attempt)),
                Err(e) => {
                    warn!(
                        what,
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "attempt failed, retrying in {:?}",
                        self.retry_interval
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl From<&DatabaseSourceConfig> for RetryPolicy {
    fn from(config: &DatabaseSourceConfig) -> Self {
        Self::new(
            config.retry_count,
            Duration::from_millis(config.retry_interval_ms),
        )
    }
}
