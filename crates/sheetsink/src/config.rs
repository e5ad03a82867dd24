// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! engine:
//!   buffer_size: 500
//!   flush_interval_ms: 5000
//! delivery:
//!   rate_per_second: 1.0
//!   burst: 60
//!   row_format: label_columns
//! sheets:
//!   spreadsheet_id: "1AbC..."
//!   sheet_id: 0
//! ```

use crate::rows::RowFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Batch engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Delivery client settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Google Sheets backend settings, if that backend is used.
    #[serde(default)]
    pub sheets: Option<SheetsApiConfig>,
}

/// Batch engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples per batch; reaching it triggers a flush.
    pub buffer_size: usize,

    /// Capacity of the intake queue. Producers block when it is full.
    pub intake_capacity: usize,

    /// Flush deadline in milliseconds, restarted after every flush attempt.
    pub flush_interval_ms: u64,

    /// Per-attempt deadline for a batch write, in seconds.
    pub request_timeout_secs: u64,

    /// Policy refresh period in seconds.
    pub policy_refresh_secs: u64,

    /// Policy fetch deadline in seconds.
    pub policy_timeout_secs: u64,

    /// Eviction period in seconds.
    pub eviction_interval_secs: u64,

    /// Eviction deadline in seconds.
    pub eviction_timeout_secs: u64,

    /// Pause between write attempts in milliseconds.
    pub retry_backoff_ms: u64,

    /// Samples older than this (seconds) when received are dropped.
    pub stale_after_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 500,
            intake_capacity: 500,
            flush_interval_ms: 5_000,
            request_timeout_secs: 120,
            policy_refresh_secs: 60,
            policy_timeout_secs: 10,
            eviction_interval_secs: 20,
            eviction_timeout_secs: 30,
            retry_backoff_ms: 2_000,
            stale_after_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn policy_refresh(&self) -> Duration {
        Duration::from_secs(self.policy_refresh_secs)
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_secs(self.policy_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_secs(self.eviction_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Reject sizes and periods the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("engine.buffer_size must be > 0".into()));
        }
        if self.intake_capacity == 0 {
            return Err(ConfigError::Invalid(
                "engine.intake_capacity must be > 0".into(),
            ));
        }

        let periods = [
            ("engine.flush_interval_ms", self.flush_interval_ms),
            ("engine.request_timeout_secs", self.request_timeout_secs),
            ("engine.policy_refresh_secs", self.policy_refresh_secs),
            ("engine.policy_timeout_secs", self.policy_timeout_secs),
            ("engine.eviction_interval_secs", self.eviction_interval_secs),
            ("engine.eviction_timeout_secs", self.eviction_timeout_secs),
            ("engine.retry_backoff_ms", self.retry_backoff_ms),
            ("engine.stale_after_secs", self.stale_after_secs),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}

/// Delivery client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Outbound calls per second (token refill rate).
    pub rate_per_second: f64,

    /// Outbound calls allowed back to back.
    pub burst: u32,

    /// Row layout written to the sheet.
    pub row_format: RowFormat,

    /// Two-column key/value region holding the policy.
    pub policy_range: String,

    /// Cell holding the index of the first row to keep.
    pub cutoff_cell: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 1.0,
            burst: 60,
            row_format: RowFormat::default(),
            policy_range: "Config!A:B".to_string(),
            cutoff_cell: "Internal!B1".to_string(),
        }
    }
}

/// Google Sheets REST backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetsApiConfig {
    /// API root.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Spreadsheet (workbook) identifier.
    pub spreadsheet_id: String,

    /// Numeric id of the data sheet inside the workbook.
    #[serde(default)]
    pub sheet_id: i64,
}

fn default_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

impl SheetsApiConfig {
    /// Settings for a spreadsheet, data on its first sheet.
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            api_base: default_api_base(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_id: 0,
        }
    }
}

impl SinkConfig {
    /// Create a new config builder
    pub fn builder() -> SinkConfigBuilder {
        SinkConfigBuilder::default()
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SinkConfig = if yaml.trim().is_empty() {
            SinkConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        let delivery = &self.delivery;
        if !(delivery.rate_per_second.is_finite() && delivery.rate_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "delivery.rate_per_second must be a positive number".into(),
            ));
        }
        if delivery.burst == 0 {
            return Err(ConfigError::Invalid("delivery.burst must be > 0".into()));
        }

        if let Some(sheets) = &self.sheets {
            if sheets.spreadsheet_id.is_empty() {
                return Err(ConfigError::Invalid(
                    "sheets.spreadsheet_id must not be empty".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Config builder for fluent API
///
/// Periods stored in whole seconds are rounded up; `build` validates.
#[derive(Debug, Default)]
pub struct SinkConfigBuilder {
    config: SinkConfig,
}

impl SinkConfigBuilder {
    /// Samples per batch
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.engine.buffer_size = size;
        self
    }

    /// Intake queue capacity
    pub fn intake_capacity(mut self, capacity: usize) -> Self {
        self.config.engine.intake_capacity = capacity;
        self
    }

    /// Flush deadline
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.engine.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Per-attempt write deadline
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.engine.request_timeout_secs = whole_secs(timeout);
        self
    }

    /// Policy refresh period
    pub fn policy_refresh(mut self, period: Duration) -> Self {
        self.config.engine.policy_refresh_secs = whole_secs(period);
        self
    }

    /// Eviction period
    pub fn eviction_interval(mut self, period: Duration) -> Self {
        self.config.engine.eviction_interval_secs = whole_secs(period);
        self
    }

    /// Pause between write attempts
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.engine.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Staleness horizon
    pub fn stale_after(mut self, horizon: Duration) -> Self {
        self.config.engine.stale_after_secs = whole_secs(horizon);
        self
    }

    /// Outbound call rate and burst
    pub fn rate_limit(mut self, per_second: f64, burst: u32) -> Self {
        self.config.delivery.rate_per_second = per_second;
        self.config.delivery.burst = burst;
        self
    }

    /// Row layout
    pub fn row_format(mut self, format: RowFormat) -> Self {
        self.config.delivery.row_format = format;
        self
    }

    /// Google Sheets backend settings
    pub fn sheets(mut self, sheets: SheetsApiConfig) -> Self {
        self.config.sheets = Some(sheets);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<SinkConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Seconds, rounded up so a sub-second duration never becomes zero.
fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_YAML: &str = r#"
engine:
  buffer_size: 100
  intake_capacity: 1000
  flush_interval_ms: 2000
  request_timeout_secs: 60
  policy_refresh_secs: 30
  eviction_interval_secs: 10
  retry_backoff_ms: 500
  stale_after_secs: 120
delivery:
  rate_per_second: 0.5
  burst: 10
  row_format: label_blob
  policy_range: "Settings!A:B"
  cutoff_cell: "Settings!D1"
sheets:
  spreadsheet_id: "sheet-123"
  sheet_id: 7
"#;

    #[test]
    fn test_config_defaults() {
        let config = SinkConfig::default();

        assert_eq!(config.engine.buffer_size, 500);
        assert_eq!(config.engine.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.engine.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.engine.policy_refresh(), Duration::from_secs(60));
        assert_eq!(config.engine.policy_timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.eviction_interval(), Duration::from_secs(20));
        assert_eq!(config.engine.eviction_timeout(), Duration::from_secs(30));
        assert_eq!(config.engine.retry_backoff(), Duration::from_secs(2));
        assert_eq!(config.engine.stale_after(), Duration::from_secs(300));
        assert_eq!(config.delivery.rate_per_second, 1.0);
        assert_eq!(config.delivery.burst, 60);
        assert_eq!(config.delivery.row_format, RowFormat::LabelColumns);
        assert!(config.sheets.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse_empty() {
        let config = SinkConfig::from_yaml("").expect("empty yaml");
        assert_eq!(config, SinkConfig::default());
    }

    #[test]
    fn test_config_parse_partial() {
        let config = SinkConfig::from_yaml("engine:\n  buffer_size: 3\n").expect("partial yaml");
        assert_eq!(config.engine.buffer_size, 3);
        assert_eq!(config.engine.flush_interval_ms, 5_000);
        assert_eq!(config.delivery, DeliveryConfig::default());
    }

    #[test]
    fn test_config_parse_all_fields() {
        let config = SinkConfig::from_yaml(FULL_YAML).expect("full yaml");

        assert_eq!(config.engine.buffer_size, 100);
        assert_eq!(config.engine.intake_capacity, 1000);
        assert_eq!(config.engine.flush_interval(), Duration::from_secs(2));
        assert_eq!(config.engine.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.engine.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.engine.stale_after(), Duration::from_secs(120));
        assert_eq!(config.delivery.rate_per_second, 0.5);
        assert_eq!(config.delivery.burst, 10);
        assert_eq!(config.delivery.row_format, RowFormat::LabelBlob);
        assert_eq!(config.delivery.policy_range, "Settings!A:B");
        assert_eq!(config.delivery.cutoff_cell, "Settings!D1");

        let sheets = config.sheets.expect("sheets section");
        assert_eq!(sheets.spreadsheet_id, "sheet-123");
        assert_eq!(sheets.sheet_id, 7);
        assert_eq!(sheets.api_base, "https://sheets.googleapis.com");
    }

    #[test]
    fn test_config_validation() {
        let err = SinkConfig::from_yaml("engine:\n  buffer_size: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SinkConfig::from_yaml("delivery:\n  rate_per_second: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SinkConfig::from_yaml("engine:\n  policy_refresh_secs: 0\n").unwrap_err();
        assert!(err.to_string().contains("policy_refresh_secs"));

        let err = SinkConfig::from_yaml("sheets:\n  spreadsheet_id: \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_YAML.as_bytes()).unwrap();

        let config = SinkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.engine.buffer_size, 100);

        let missing = SinkConfig::from_file("/nonexistent/sheetsink.yaml");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_config_builder() {
        let config = SinkConfig::builder()
            .buffer_size(3)
            .flush_interval(Duration::from_secs(1))
            .rate_limit(2.0, 5)
            .row_format(RowFormat::LabelBlob)
            .sheets(SheetsApiConfig::new("abc"))
            .build()
            .unwrap();

        assert_eq!(config.engine.buffer_size, 3);
        assert_eq!(config.engine.flush_interval_ms, 1000);
        assert_eq!(config.delivery.burst, 5);
        assert_eq!(config.delivery.row_format, RowFormat::LabelBlob);
        assert_eq!(config.sheets.map(|s| s.spreadsheet_id), Some("abc".to_string()));
    }

    #[test]
    fn test_builder_rounds_sub_second_periods_up() {
        let config = SinkConfig::builder()
            .policy_refresh(Duration::from_millis(500))
            .eviction_interval(Duration::from_millis(1500))
            .request_timeout(Duration::from_secs(30))
            .stale_after(Duration::from_millis(1))
            .build()
            .unwrap();

        assert_eq!(config.engine.policy_refresh_secs, 1);
        assert_eq!(config.engine.eviction_interval_secs, 2);
        assert_eq!(config.engine.request_timeout_secs, 30);
        assert_eq!(config.engine.stale_after_secs, 1);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let err = SinkConfig::builder()
            .policy_refresh(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("policy_refresh_secs"));

        let err = SinkConfig::builder().buffer_size(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SinkConfig::builder()
            .retry_backoff(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("retry_backoff_ms"));
    }
}
