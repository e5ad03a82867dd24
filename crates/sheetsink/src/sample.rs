// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timeseries sample model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved label carrying the metric name in a raw series label set.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// One metric observation.
///
/// Samples are immutable once produced. The engine takes ownership when a
/// sample is enqueued and keeps it until the batch containing it has been
/// delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Metric name (case preserved; matching is case-insensitive).
    pub metric_name: String,

    /// Label set, without the metric name.
    pub labels: BTreeMap<String, String>,

    /// Observed value (may be NaN).
    pub value: f64,

    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// Create a sample from its parts.
    pub fn new(
        metric_name: impl Into<String>,
        labels: BTreeMap<String, String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            labels,
            value,
            timestamp,
        }
    }

    /// Create a sample from a raw series label set.
    ///
    /// The `__name__` label is split out into `metric_name`; a series without
    /// it gets an empty name.
    pub fn from_labels(
        mut labels: BTreeMap<String, String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let metric_name = labels.remove(METRIC_NAME_LABEL).unwrap_or_default();
        Self::new(metric_name, labels, value, timestamp)
    }

    /// Metric name folded to lower case, as used for allow-list matching.
    pub fn normalized_name(&self) -> String {
        self.metric_name.to_lowercase()
    }

    /// Add or replace a label (builder style).
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
