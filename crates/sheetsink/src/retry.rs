// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retry policies.
//!
//! A policy only decides how long to wait before the next attempt, or that
//! there is no next attempt. [`retry`] drives an operation with it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Decides whether and when a failed operation is attempted again.
pub trait RetryPolicy: Send + Sync {
    /// Delay before attempt `failures + 1`, or `None` to give up.
    ///
    /// `failures` counts failed attempts so far and starts at 1.
    fn next_delay(&self, failures: u32) -> Option<Duration>;
}

/// Retries forever with a fixed pause. No jitter, no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EternalRetry {
    backoff: Duration,
}

impl EternalRetry {
    /// Create a policy pausing `backoff` between attempts.
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Pause between attempts.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for EternalRetry {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

impl RetryPolicy for EternalRetry {
    fn next_delay(&self, _failures: u32) -> Option<Duration> {
        Some(self.backoff)
    }
}

/// Fixed pause, at most `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRetry {
    backoff: Duration,
    max_attempts: u32,
}

impl BoundedRetry {
    /// Create a policy allowing `max_attempts` attempts in total.
    pub fn new(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }
}

impl RetryPolicy for BoundedRetry {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        (failures < self.max_attempts).then_some(self.backoff)
    }
}

/// Run `op` until it succeeds or `policy` gives up.
///
/// `op` receives the 1-based attempt number. Returns the last error when
/// the policy gives up.
pub async fn retry<P, T, E, F, Fut>(policy: &P, mut op: F) -> Result<T, E>
where
    P: RetryPolicy + ?Sized,
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(attempt, error = %e, "attempt failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    tracing::info!("retry attempt #{}", attempt);
                }
                None => return Err(e),
            },
        }
    }
}
