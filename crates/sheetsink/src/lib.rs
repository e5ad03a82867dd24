// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sheet Sink
//!
//! Batched, rate-limited delivery of timeseries samples into a spreadsheet
//! with a hard cell ceiling.
//!
//! This crate provides:
//! - A bounded intake queue fed by protocol decoders
//! - A single-task batch engine with size and time-based flushing
//! - Metric allow-listing and retention read from the sheet itself
//! - Periodic eviction of rows older than the retention window
//! - Room-making writes once the sheet reports it is full
//! - A token-bucket limiter shared by every sheet call
//!
//! # Overview
//!
//! The engine never gives up on a batch while the default retry policy is in
//! place: a failing sheet stalls delivery and, through the bounded intake
//! queue, the producers.
//!
//! ```text
//! Sample --> IntakeHandle --> BatchEngine --> DeliveryClient --> SheetBackend
//!                               |   ^             |
//!                               |   +-- Policy <--+  (allow-list, retention)
//!                               +--> evict -------+  (sort, read cutoff, delete)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sheetsink::{BatchEngine, DeliveryClient, MemorySheet, SinkConfig};
//!
//! let config = SinkConfig::from_file("sink.yaml")?;
//! let client = DeliveryClient::new(MemorySheet::new(), &config.delivery);
//! let (engine, intake) = BatchEngine::new(config.engine, client);
//! tokio::spawn(engine.run());
//! intake.enqueue(sample).await?;
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod labels;
pub mod policy;
pub mod rate_limit;
pub mod retry;
pub mod rows;
pub mod sample;
#[cfg(feature = "sheets-api")]
pub mod sheets_api;

pub use backend::{MemorySheet, SheetBackend, SheetOp};
pub use client::DeliveryClient;
pub use config::{
    ConfigError, DeliveryConfig, EngineConfig, SheetsApiConfig, SinkConfig, SinkConfigBuilder,
};
pub use engine::{BatchEngine, CapacityState, EngineStats, EngineStatsSnapshot};
pub use error::{
    BackendError, EvictionError, IntakeClosed, PolicyFetchError, StartupError, WriteError,
};
pub use intake::IntakeHandle;
pub use policy::Policy;
pub use rate_limit::RateLimiter;
pub use retry::{BoundedRetry, EternalRetry, RetryPolicy};
pub use rows::{CellValue, Row, RowFormat};
pub use sample::Sample;
#[cfg(feature = "sheets-api")]
pub use sheets_api::SheetsApi;
