// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample to sheet row mapping.
//!
//! Two layouts are supported:
//!
//! ```text
//! label_columns: 2026-10-19T08:00:00.000Z | cpu_usage | 0.42 | <job> | <instance> | ...
//! label_blob:    1792396800 | 1792396795 | cpu_usage | 0.42 | "instance: a\njob: node"
//! ```
//!
//! `label_columns` gives every label key its own column (positions from a
//! [`LabelColumnMap`]); `label_blob` keeps rows narrow by folding all labels
//! into one free-text cell.

use crate::labels::LabelColumnMap;
use crate::sample::Sample;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Number of fixed leading columns in the `label_columns` layout.
pub const FIXED_COLUMNS: usize = 3;

/// A value that can be stored in a sheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Text cell.
    String(String),
    /// Numeric cell.
    Number(f64),
    /// Blank cell.
    Empty,
}

impl CellValue {
    /// Numeric cell, blank if the value is NaN (sheets cannot store NaN).
    pub fn number(value: f64) -> Self {
        if value.is_nan() {
            CellValue::Empty
        } else {
            CellValue::Number(value)
        }
    }

    /// Ascending sort order used by range sorts: numbers, then text, then blanks.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Number(a), CellValue::Number(b)) => a.total_cmp(b),
            (CellValue::Number(_), _) => Ordering::Less,
            (_, CellValue::Number(_)) => Ordering::Greater,
            (CellValue::String(a), CellValue::String(b)) => a.cmp(b),
            (CellValue::String(_), CellValue::Empty) => Ordering::Less,
            (CellValue::Empty, CellValue::String(_)) => Ordering::Greater,
            (CellValue::Empty, CellValue::Empty) => Ordering::Equal,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{}", s),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Empty => Ok(()),
        }
    }
}

/// One sheet row.
pub type Row = Vec<CellValue>;

/// Row layout written to the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFormat {
    /// One column per label key, positions assigned on first sight.
    #[default]
    LabelColumns,
    /// All labels folded into a single sorted `key: value` text cell.
    LabelBlob,
}

/// Maps samples to rows in the configured layout.
///
/// Owns the [`LabelColumnMap`] for the `label_columns` layout; the map is
/// never reset, so column positions stay stable across batches.
#[derive(Debug, Default)]
pub struct RowMapper {
    format: RowFormat,
    columns: LabelColumnMap,
}

impl RowMapper {
    /// Create a mapper for the given layout.
    pub fn new(format: RowFormat) -> Self {
        Self {
            format,
            columns: LabelColumnMap::new(),
        }
    }

    /// Layout in use.
    pub fn format(&self) -> RowFormat {
        self.format
    }

    /// Label columns assigned so far.
    pub fn columns(&self) -> &LabelColumnMap {
        &self.columns
    }

    /// Map one sample. `received_at` is only used by the `label_blob` layout.
    pub fn map_sample(&mut self, received_at: DateTime<Utc>, sample: &Sample) -> Row {
        match self.format {
            RowFormat::LabelColumns => self.label_columns_row(sample),
            RowFormat::LabelBlob => label_blob_row(received_at, sample),
        }
    }

    /// Map a batch, preserving order.
    pub fn map_batch(&mut self, received_at: DateTime<Utc>, samples: &[Sample]) -> Vec<Row> {
        samples
            .iter()
            .map(|s| self.map_sample(received_at, s))
            .collect()
    }

    fn label_columns_row(&mut self, sample: &Sample) -> Row {
        let mut row = vec![
            CellValue::String(
                sample
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            CellValue::String(sample.metric_name.clone()),
            CellValue::number(sample.value),
        ];

        for (key, value) in &sample.labels {
            let pos = FIXED_COLUMNS + self.columns.column_for(key);
            if row.len() <= pos {
                row.resize(pos + 1, CellValue::Empty);
            }
            row[pos] = CellValue::String(value.clone());
        }

        row
    }
}

fn label_blob_row(received_at: DateTime<Utc>, sample: &Sample) -> Row {
    // BTreeMap iteration is already sorted by key
    let labels: Vec<String> = sample
        .labels
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();

    vec![
        CellValue::Number(received_at.timestamp() as f64),
        CellValue::Number(sample.timestamp.timestamp() as f64),
        CellValue::String(sample.metric_name.clone()),
        CellValue::number(sample.value),
        CellValue::String(labels.join("\n")),
    ]
}
