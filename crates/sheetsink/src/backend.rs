// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sheet backend abstraction
//!
//! The delivery client needs four capabilities from the tabular service:
//! append rows, delete a leading row range, read a cell range, and sort the
//! data rows by their first column. Mutations are grouped into a batch that
//! the backend applies atomically.
//!
//! # Implementations
//!
//! - `SheetsApi` -- Google Sheets REST API (feature `sheets-api`)
//! - [`MemorySheet`] -- In-memory sheet for tests and dry runs

use crate::error::{BackendError, CELL_LIMIT_MARKER};
use crate::rows::{CellValue, Row};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

/// One mutation inside a batch update.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetOp {
    /// Delete data rows `[start, end)`.
    DeleteRows {
        /// First row to delete (0-based).
        start: usize,
        /// One past the last row to delete.
        end: usize,
    },
    /// Append rows after the last data row.
    AppendRows(Vec<Row>),
    /// Sort all data rows ascending by their first column.
    SortByFirstColumn,
}

/// Sheet backend trait
///
/// Backend-agnostic interface to the row-oriented sink.
pub trait SheetBackend: Send + Sync {
    /// Apply all `ops` in order, as one request.
    fn batch_update(
        &self,
        ops: Vec<SheetOp>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Read a range in A1 notation (e.g. `Config!A:B`), as formatted text.
    ///
    /// Trailing empty rows and cells are omitted, as the provider does.
    fn read_range(
        &self,
        range: &str,
    ) -> impl Future<Output = Result<Vec<Vec<String>>, BackendError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<Row>,
    ranges: HashMap<String, Vec<Vec<String>>>,
    batches: Vec<Vec<SheetOp>>,
    reads: Vec<String>,
    failures: VecDeque<BackendError>,
    cell_limit: Option<usize>,
}

/// In-memory sheet
///
/// Clones share the same sheet, so a test can hand one clone to the
/// delivery client and inspect the other.
///
/// Every batch is recorded before it is applied, including batches that
/// fail. A batch that fails leaves the rows untouched.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySheet {
    /// Create an empty sheet with no cell limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject batches that would leave more than `limit` cells in the data rows.
    pub fn with_cell_limit(self, limit: usize) -> Self {
        self.lock().cell_limit = Some(limit);
        self
    }

    /// Set the content returned when `range` is read.
    pub fn set_range(&self, range: &str, values: Vec<Vec<String>>) {
        self.lock().ranges.insert(range.to_string(), values);
    }

    /// Set a single-cell range.
    pub fn set_cell(&self, range: &str, value: &str) {
        self.set_range(range, vec![vec![value.to_string()]]);
    }

    /// Append data rows directly, bypassing limits and history.
    pub fn push_rows(&self, rows: impl IntoIterator<Item = Row>) {
        self.lock().rows.extend(rows);
    }

    /// Make the next call (batch or read) fail with `error`.
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, error: BackendError) {
        self.lock().failures.push_back(error);
    }

    /// Current data rows.
    pub fn rows(&self) -> Vec<Row> {
        self.lock().rows.clone()
    }

    /// Every batch received so far, failed ones included.
    pub fn batches(&self) -> Vec<Vec<SheetOp>> {
        self.lock().batches.clone()
    }

    /// Batches that contained an append, failed ones included.
    pub fn append_batches(&self) -> Vec<Vec<SheetOp>> {
        self.lock()
            .batches
            .iter()
            .filter(|batch| batch.iter().any(|op| matches!(op, SheetOp::AppendRows(_))))
            .cloned()
            .collect()
    }

    /// Ranges read so far, in order.
    pub fn reads(&self) -> Vec<String> {
        self.lock().reads.clone()
    }

    /// Total number of cells in the data rows.
    pub fn cell_count(&self) -> usize {
        count_cells(&self.lock().rows)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn apply(&self, ops: Vec<SheetOp>) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.batches.push(ops.clone());

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let mut rows = state.rows.clone();
        for (idx, op) in ops.into_iter().enumerate() {
            match op {
                SheetOp::DeleteRows { start, end } => {
                    let end = end.min(rows.len());
                    if start < end {
                        rows.drain(start..end);
                    }
                }
                SheetOp::AppendRows(new_rows) => {
                    rows.extend(new_rows);
                    if let Some(limit) = state.cell_limit {
                        if count_cells(&rows) > limit {
                            return Err(BackendError::Api {
                                code: 400,
                                message: format!(
                                    "Invalid requests[{}].appendCells: This action would {} of {} cells.",
                                    idx, CELL_LIMIT_MARKER, limit
                                ),
                            });
                        }
                    }
                }
                SheetOp::SortByFirstColumn => {
                    rows.sort_by(|a, b| {
                        let a = a.first().unwrap_or(&CellValue::Empty);
                        let b = b.first().unwrap_or(&CellValue::Empty);
                        a.sort_cmp(b)
                    });
                }
            }
        }

        state.rows = rows;
        Ok(())
    }

    fn read(&self, range: &str) -> Result<Vec<Vec<String>>, BackendError> {
        let mut state = self.lock();
        state.reads.push(range.to_string());

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        Ok(state.ranges.get(range).cloned().unwrap_or_default())
    }
}

impl SheetBackend for MemorySheet {
    async fn batch_update(&self, ops: Vec<SheetOp>) -> Result<(), BackendError> {
        self.apply(ops)
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, BackendError> {
        self.read(range)
    }
}

fn count_cells(rows: &[Row]) -> usize {
    rows.iter().map(Vec::len).sum()
}
