// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Label key to column index registry.
//!
//! Used by the indexed row layout. Columns are assigned in first-seen
//! order and never move or disappear: once a key owns column `i` it keeps
//! it for the life of the process, even if the label stops appearing.

use std::collections::HashMap;

/// Append-only, order-preserving map from label key to column index.
#[derive(Debug, Default, Clone)]
pub struct LabelColumnMap {
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelColumnMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Column index for `key`, assigning the next free one on first sight.
    pub fn column_for(&mut self, key: &str) -> usize {
        if let Some(&idx) = self.index.get(key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key.to_string());
        self.index.insert(key.to_string(), idx);
        idx
    }

    /// Column index for `key` if it has been seen.
    pub fn get(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Keys in column order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of label columns assigned so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no label has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
