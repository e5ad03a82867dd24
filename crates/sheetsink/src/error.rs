// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types.
//!
//! Only [`StartupError`] ever leaves the engine. Everything else is absorbed
//! during steady-state operation: write failures are retried, policy and
//! eviction failures are logged and the previous state kept.

use crate::config::ConfigError;
use crate::rate_limit::RateLimitError;
use std::time::Duration;
use thiserror::Error;

/// Marker in the provider's error message when a write would push the
/// workbook past its absolute cell ceiling.
pub const CELL_LIMIT_MARKER: &str = "increase the number of cells in the workbook above the limit";

/// Failure reported by a sheet backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider rejected the request.
    #[error("sheet API error {code}: {message}")]
    Api {
        /// Status code reported by the provider.
        code: u16,
        /// Human-readable message from the provider.
        message: String,
    },

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    /// True if the provider refused the write because of its cell ceiling.
    pub fn is_capacity_exceeded(&self) -> bool {
        match self {
            BackendError::Api { message, .. } => message.contains(CELL_LIMIT_MARKER),
            _ => false,
        }
    }
}

/// Batch write failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WriteError {
    /// The rate limiter could not hand out a token before the deadline.
    #[error("rate limiter wait failed: {0}")]
    RateLimitWait(#[from] RateLimitError),

    /// The sheet is at its cell ceiling; room has to be made first.
    #[error("sheet capacity exceeded: {0}")]
    SinkCapacity(BackendError),

    /// Any other backend failure.
    #[error("sheet call failed: {0}")]
    SinkCall(BackendError),

    /// The per-attempt deadline elapsed.
    #[error("sheet write timed out after {0:?}")]
    Timeout(Duration),
}

impl From<BackendError> for WriteError {
    fn from(e: BackendError) -> Self {
        if e.is_capacity_exceeded() {
            WriteError::SinkCapacity(e)
        } else {
            WriteError::SinkCall(e)
        }
    }
}

/// Policy read failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyFetchError {
    /// The rate limiter could not hand out a token before the deadline.
    #[error("rate limiter wait failed: {0}")]
    RateLimitWait(#[from] RateLimitError),

    /// The backend failed to read the policy region.
    #[error("policy read failed: {0}")]
    Sink(#[from] BackendError),

    /// The deadline elapsed.
    #[error("policy fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Eviction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvictionError {
    /// The rate limiter could not hand out a token before the deadline.
    #[error("rate limiter wait failed: {0}")]
    RateLimitWait(#[from] RateLimitError),

    /// A sort, read or delete call failed.
    #[error("eviction call failed: {0}")]
    Sink(#[from] BackendError),

    /// The cutoff cell holds something that is neither a row count nor a sentinel.
    #[error("invalid cutoff cell value: {0:?}")]
    InvalidCutoff(String),

    /// The deadline elapsed.
    #[error("eviction timed out after {0:?}")]
    Timeout(Duration),
}

/// Fatal errors: the engine never entered its loop.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The engine settings cannot be run with (e.g. a zero period).
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// The initial policy fetch failed.
    #[error("initial policy fetch failed: {0}")]
    Policy(#[from] PolicyFetchError),

    /// The initial eviction pass failed.
    #[error("initial eviction failed: {0}")]
    Eviction(#[from] EvictionError),
}

/// Returned by the intake once the engine has stopped.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("intake closed: the batch engine is no longer running")]
pub struct IntakeClosed;
