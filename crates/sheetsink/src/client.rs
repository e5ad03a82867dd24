// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery client
//!
//! Talks to the sheet backend on behalf of the engine:
//!
//! - `write` appends a batch, optionally deleting as many leading rows first
//! - `fetch_policy` reads the key/value policy region
//! - `evict` sorts the data rows and deletes everything before the cutoff
//!
//! Every backend call takes one token from the shared rate limiter, and
//! every operation runs under a caller-supplied timeout.

use crate::backend::{SheetBackend, SheetOp};
use crate::config::DeliveryConfig;
use crate::error::{EvictionError, PolicyFetchError, WriteError};
use crate::policy::Policy;
use crate::rate_limit::RateLimiter;
use crate::rows::{RowFormat, RowMapper};
use crate::sample::Sample;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Rate-limited, schema-mapping client for a sheet backend.
///
/// All methods take `&self`; the label column map and the rate limiter are
/// internally synchronized, so the client can be shared between tasks.
pub struct DeliveryClient<B: SheetBackend> {
    backend: B,
    limiter: RateLimiter,
    mapper: Mutex<RowMapper>,
    policy_range: String,
    cutoff_cell: String,
}

impl<B: SheetBackend> DeliveryClient<B> {
    /// Create a client over `backend`.
    pub fn new(backend: B, config: &DeliveryConfig) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(config.rate_per_second, config.burst),
            mapper: Mutex::new(RowMapper::new(config.row_format)),
            policy_range: config.policy_range.clone(),
            cutoff_cell: config.cutoff_cell.clone(),
        }
    }

    /// Underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Shared rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Row layout in use.
    pub fn row_format(&self) -> RowFormat {
        self.mapper().format()
    }

    /// Label keys in column order (empty for the `label_blob` layout).
    pub fn label_columns(&self) -> Vec<String> {
        self.mapper().columns().keys().to_vec()
    }

    /// Append `samples` as rows, in order.
    ///
    /// With `make_room`, the same request first deletes as many leading rows
    /// as the batch is long. That is an approximation of the space the batch
    /// needs, not an exact computation.
    pub async fn write(
        &self,
        samples: &[Sample],
        make_room: bool,
        timeout: Duration,
    ) -> Result<(), WriteError> {
        if samples.is_empty() {
            return Ok(());
        }

        let rows = self.mapper().map_batch(Utc::now(), samples);

        let mut ops = Vec::with_capacity(2);
        if make_room {
            ops.push(SheetOp::DeleteRows {
                start: 0,
                end: rows.len(),
            });
        }
        ops.push(SheetOp::AppendRows(rows));

        let deadline = Instant::now() + timeout;
        let call = async {
            self.limiter.acquire(deadline).await?;
            self.backend.batch_update(ops).await?;
            Ok::<(), WriteError>(())
        };

        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout(timeout)),
        }
    }

    /// Read the policy region.
    pub async fn fetch_policy(&self, timeout: Duration) -> Result<Policy, PolicyFetchError> {
        let deadline = Instant::now() + timeout;
        let call = async {
            self.limiter.acquire(deadline).await?;
            let rows = self.backend.read_range(&self.policy_range).await?;
            Ok::<Policy, PolicyFetchError>(Policy::from_rows(&rows))
        };

        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(PolicyFetchError::Timeout(timeout)),
        }
    }

    /// Retire old rows. Returns the number of rows deleted.
    ///
    /// Sorts the data rows by their first column so the oldest come first,
    /// then reads the cutoff cell (maintained by a formula in the sheet) and
    /// deletes every row before it. A blank cell or a spreadsheet error
    /// value such as `#N/A` means there is nothing to retire.
    pub async fn evict(&self, timeout: Duration) -> Result<usize, EvictionError> {
        let deadline = Instant::now() + timeout;
        let call = async {
            self.limiter.acquire(deadline).await?;
            self.backend
                .batch_update(vec![SheetOp::SortByFirstColumn])
                .await?;

            self.limiter.acquire(deadline).await?;
            let cells = self.backend.read_range(&self.cutoff_cell).await?;
            let cutoff = match parse_cutoff(&cells)? {
                Some(rows) if rows > 0 => rows,
                _ => return Ok(0),
            };

            self.limiter.acquire(deadline).await?;
            self.backend
                .batch_update(vec![SheetOp::DeleteRows {
                    start: 0,
                    end: cutoff,
                }])
                .await?;
            Ok::<usize, EvictionError>(cutoff)
        };

        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(EvictionError::Timeout(timeout)),
        }
    }

    fn mapper(&self) -> MutexGuard<'_, RowMapper> {
        match self.mapper.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Interpret the cutoff cell. `None` means nothing to evict.
fn parse_cutoff(cells: &[Vec<String>]) -> Result<Option<usize>, EvictionError> {
    let value = match cells.first().and_then(|row| row.first()) {
        Some(value) => value.trim(),
        None => return Ok(None),
    };

    // Spreadsheet error values: #N/A, #REF!, #VALUE!, ...
    if value.is_empty() || value.starts_with('#') {
        return Ok(None);
    }

    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| EvictionError::InvalidCutoff(value.to_string()))
}
