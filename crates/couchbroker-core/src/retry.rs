// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry-until-deadline with a growing interval.

use std::future::Future;
use std::time::Duration;

/// Retry policy for polling operations.
///
/// The first attempt runs after `grace`. Between attempts the caller sleeps
/// the current interval, which starts at `initial_interval` and is multiplied
/// by `multiplier` after every attempt, capped at `max_interval`. No attempt
/// is made once the cumulative time slept after failed attempts reaches
/// `budget`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Wait before the first attempt.
    pub grace: Duration,
    /// First interval between attempts.
    pub initial_interval: Duration,
    /// Growth factor applied to the interval after each attempt.
    pub multiplier: u32,
    /// Interval ceiling.
    pub max_interval: Duration,
    /// Total time to spend waiting between attempts.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(100),
            initial_interval: Duration::from_secs(1),
            multiplier: 2,
            max_interval: Duration::from_secs(10),
            budget: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Default policy with a different budget.
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Interval to sleep after `attempt` (1-indexed) failed.
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}

/// Returned when every attempt within the budget failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts made.
    pub attempts: u32,
    /// Time slept between attempts.
    pub waited: Duration,
    /// Error from the final attempt.
    pub last_error: Option<E>,
}

/// Run `op` until it succeeds or the policy's budget is spent.
///
/// `op` receives the 1-indexed attempt number.
pub async fn retry_until_deadline<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if !policy.grace.is_zero() {
        tokio::time::sleep(policy.grace).await;
    }

    let mut attempt = 0u32;
    let mut waited = Duration::ZERO;
    loop {
        attempt += 1;
        let last_error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if waited < policy.budget {
            let interval = policy.interval_for_attempt(attempt);
            tokio::time::sleep(interval).await;
            waited += interval;
        }

        // No further attempt once the budget is spent.
        if waited >= policy.budget {
            return Err(RetryExhausted {
                attempts: attempt,
                waited,
                last_error: Some(last_error),
            });
        }
    }
}
