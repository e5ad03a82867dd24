// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Token bucket rate limiter for outbound sink calls.
//!
//! Tokens refill at a fixed rate up to the burst capacity. Every call to
//! the sink takes one token; when none is left the caller sleeps until one
//! refills, unless that would run past the caller's deadline.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Rate limiter errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateLimitError {
    /// Waiting for a token would run past the caller's deadline.
    #[error("rate limiter wait of {wait:?} would exceed deadline")]
    WouldExceedDeadline {
        /// Time the caller would have had to wait.
        wait: Duration,
    },
}

#[derive(Debug)]
struct Bucket {
    /// Current token count. Goes negative while callers hold reservations.
    tokens: f64,
    /// Last refill timestamp.
    last_refill: Instant,
}

/// Token bucket shared by all operations of a delivery client.
///
/// Safe to use from several tasks: reservations are taken under a lock and
/// the wait happens outside it.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    /// Refill rate in tokens per second.
    rate: f64,
    /// Maximum token count (burst size).
    burst: u32,
}

impl RateLimiter {
    /// Create a limiter that starts full.
    ///
    /// # Arguments
    ///
    /// * `rate` - Token refill rate per second
    /// * `burst` - Maximum tokens available at once
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            rate,
            burst,
        }
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Burst capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Tokens available right now (negative while reservations are pending).
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Take one token, sleeping until it is available.
    ///
    /// Fails without consuming anything if the token would only become
    /// available after `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), RateLimitError> {
        let wait = {
            let mut bucket = self.lock();
            let now = Instant::now();
            self.refill(&mut bucket, now);

            let wait = self.wait_for_one(bucket.tokens);
            if now.checked_add(wait).map_or(true, |ready| ready > deadline) {
                return Err(RateLimitError::WouldExceedDeadline { wait });
            }
            bucket.tokens -= 1.0;
            wait
        };

        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for rate limiter");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    /// Time until one more token can be taken given the current count.
    fn wait_for_one(&self, tokens: f64) -> Duration {
        if tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((1.0 - tokens) / self.rate).unwrap_or(Duration::MAX)
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() {
            return;
        }
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst as f64);
        bucket.last_refill = now;
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
