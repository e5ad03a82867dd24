// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Filtering and retention policy.
//!
//! The policy lives in the spreadsheet itself, as a two-column key/value
//! region:
//!
//! ```text
//! METRICS       | cpu_usage
//!               | node_load1
//! RETIRE_AFTER  | 30m
//! ```
//!
//! Each refresh replaces the previous policy wholesale.

use std::collections::HashSet;
use std::time::Duration;

/// Retention applied when `RETIRE_AFTER` is missing or unparseable.
pub const DEFAULT_RETIRE_AFTER: Duration = Duration::from_secs(10 * 60);

const METRICS_KEY: &str = "METRICS";
const RETIRE_AFTER_KEY: &str = "RETIRE_AFTER";

/// Allow-list plus retention window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Lower-cased metric names that may be buffered. Empty means nothing passes.
    pub allowed_metrics: HashSet<String>,

    /// Age after which rows are retired from the sheet.
    pub retire_after: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allowed_metrics: HashSet::new(),
            retire_after: DEFAULT_RETIRE_AFTER,
        }
    }
}

impl Policy {
    /// Build a policy from the rows of the key/value region.
    ///
    /// Keys are matched case-insensitively; unknown keys and rows with fewer
    /// than two cells are ignored.
    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        let mut policy = Policy::default();

        for row in rows {
            let (key, value) = match row.as_slice() {
                [key, value, ..] => (key, value),
                _ => continue,
            };

            match key.trim().to_uppercase().as_str() {
                METRICS_KEY => {
                    policy.allowed_metrics = value
                        .to_lowercase()
                        .split([',', '\n'])
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                RETIRE_AFTER_KEY => {
                    policy.retire_after =
                        parse_duration(&value.to_lowercase()).unwrap_or(DEFAULT_RETIRE_AFTER);
                }
                _ => {}
            }
        }

        policy
    }

    /// Create a policy allowing the given metric names.
    pub fn allowing<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_metrics: names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
            retire_after: DEFAULT_RETIRE_AFTER,
        }
    }

    /// Whether a metric passes the allow-list (case-insensitive).
    pub fn allows(&self, metric_name: &str) -> bool {
        self.allowed_metrics.contains(&metric_name.to_lowercase())
    }
}

/// Parse a duration string such as `90s`, `1h30m`, `1.5h` or `250ms`.
///
/// Accepted units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. A bare `0` is
/// zero. Negative durations are rejected.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let text = text.strip_prefix('+').unwrap_or(text);
    if text.is_empty() {
        return None;
    }
    if text == "0" {
        return Some(Duration::ZERO);
    }

    let mut rest = text;
    let mut total_ns = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total_ns += number * scale;
    }

    if !total_ns.is_finite() || total_ns > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_ns.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> Vec<String> {
        vec![key.to_string(), value.to_string()]
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("ten minutes"), None);
        assert_eq!(parse_duration("-5m"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_from_rows_full() {
        let policy = Policy::from_rows(&[
            row("METRICS", "CPU_Usage\nnode_load1, up"),
            row("retire_after", "30M"),
        ]);

        assert_eq!(policy.allowed_metrics.len(), 3);
        assert!(policy.allowed_metrics.contains("cpu_usage"));
        assert!(policy.allowed_metrics.contains("node_load1"));
        assert!(policy.allowed_metrics.contains("up"));
        assert_eq!(policy.retire_after, Duration::from_secs(1800));
    }

    #[test]
    fn test_from_rows_ignores_unknown_and_short_rows() {
        let policy = Policy::from_rows(&[
            vec!["METRICS".to_string()],
            row("OWNER", "ops"),
            row("METRICS", "up"),
        ]);

        assert_eq!(policy.allowed_metrics.len(), 1);
        assert!(policy.allows("UP"));
    }

    #[test]
    fn test_from_rows_defaults() {
        let policy = Policy::from_rows(&[]);
        assert!(policy.allowed_metrics.is_empty());
        assert_eq!(policy.retire_after, DEFAULT_RETIRE_AFTER);
        assert!(!policy.allows("anything"));
    }

    #[test]
    fn test_unparseable_retire_after_falls_back() {
        let policy = Policy::from_rows(&[row("RETIRE_AFTER", "soon")]);
        assert_eq!(policy.retire_after, DEFAULT_RETIRE_AFTER);
    }

    #[test]
    fn test_allows_is_case_insensitive() {
        let policy = Policy::allowing(["cpu_usage"]);
        assert!(policy.allows("CPU_Usage"));
        assert!(!policy.allows("mem_usage"));
    }
}
