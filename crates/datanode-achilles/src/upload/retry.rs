// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry for the compress+send step.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Exponential backoff: delay * 2^(retry-1)
    #[default]
    ExponentialBackoff,
}

/// Retry policy for result uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Delay growth.
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_attempts: u32, delay: Duration, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts,
            delay,
            strategy,
        }
    }

    /// Delay before the given retry (1-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let multiplier = match self.strategy {
            RetryStrategy::Fixed => 1,
            RetryStrategy::ExponentialBackoff => 2u32.saturating_pow(retry.saturating_sub(1)),
        };
        self.delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            strategy: RetryStrategy::default(),
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error on exhaustion, with the number of attempts made.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    delay = ?delay,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err((attempt, e)),
        }
    }
}
