// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch engine
//!
//! Single-task event loop that owns the sample buffer.
//!
//! # Operation
//!
//! 1. Fetch the policy and run one eviction pass (failure is fatal)
//! 2. Buffer allowed, fresh samples from the intake queue
//! 3. Flush when the buffer is full or the flush deadline elapses
//! 4. Refresh the policy and retire old rows on their own periods
//!
//! A flush retries through the configured [`RetryPolicy`] and blocks the
//! loop while it does: nothing is buffered and no timer is served until the
//! batch is delivered.

use crate::backend::SheetBackend;
use crate::client::DeliveryClient;
use crate::config::EngineConfig;
use crate::error::{StartupError, WriteError};
use crate::intake::{IntakeHandle, Received};
use crate::policy::Policy;
use crate::retry::{retry, EternalRetry, RetryPolicy};
use crate::sample::Sample;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Whether the sheet has hit its cell ceiling.
///
/// Set on the first capacity error and never cleared for the life of the
/// process: from then on every write deletes leading rows before appending.
#[derive(Debug, Default)]
pub struct CapacityState {
    at_capacity: AtomicBool,
}

impl CapacityState {
    /// True once a capacity error has been seen.
    pub fn is_at_capacity(&self) -> bool {
        self.at_capacity.load(Ordering::Acquire)
    }

    /// Record a capacity error. Returns true if this is the first one.
    fn mark(&self) -> bool {
        !self.at_capacity.swap(true, Ordering::AcqRel)
    }
}

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Samples accepted into the buffer
    pub samples_buffered: AtomicU64,
    /// Samples dropped for being older than the staleness horizon
    pub samples_stale: AtomicU64,
    /// Batches delivered
    pub batches_flushed: AtomicU64,
    /// Rows delivered
    pub rows_flushed: AtomicU64,
    /// Failed write attempts
    pub flush_failures: AtomicU64,
    /// Rows retired by eviction
    pub rows_evicted: AtomicU64,
    /// Failed periodic policy refreshes
    pub policy_refresh_failures: AtomicU64,
    /// Failed periodic eviction passes
    pub eviction_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub samples_buffered: u64,
    pub samples_stale: u64,
    pub batches_flushed: u64,
    pub rows_flushed: u64,
    pub flush_failures: u64,
    pub rows_evicted: u64,
    pub policy_refresh_failures: u64,
    pub eviction_failures: u64,
}

impl EngineStats {
    /// Get snapshot of all counters
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            samples_buffered: self.samples_buffered.load(Ordering::Relaxed),
            samples_stale: self.samples_stale.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            rows_flushed: self.rows_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            rows_evicted: self.rows_evicted.load(Ordering::Relaxed),
            policy_refresh_failures: self.policy_refresh_failures.load(Ordering::Relaxed),
            eviction_failures: self.eviction_failures.load(Ordering::Relaxed),
        }
    }
}

/// Buffers samples and delivers them to the sheet in batches.
pub struct BatchEngine<B: SheetBackend, R: RetryPolicy = EternalRetry> {
    config: EngineConfig,
    client: DeliveryClient<B>,
    retry: R,
    intake: mpsc::Receiver<Received>,
    buffer: Vec<Sample>,
    policy: Policy,
    capacity: Arc<CapacityState>,
    stats: Arc<EngineStats>,
}

impl<B: SheetBackend> BatchEngine<B, EternalRetry> {
    /// Create an engine retrying writes forever with the configured backoff.
    ///
    /// Returns the engine and the intake handle producers enqueue through.
    pub fn new(config: EngineConfig, client: DeliveryClient<B>) -> (Self, IntakeHandle) {
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));
        let retry = EternalRetry::new(config.retry_backoff());

        let engine = Self {
            buffer: Vec::with_capacity(config.buffer_size),
            config,
            client,
            retry,
            intake: rx,
            policy: Policy::default(),
            capacity: Arc::new(CapacityState::default()),
            stats: Arc::new(EngineStats::default()),
        };
        (engine, IntakeHandle::new(tx))
    }
}

impl<B: SheetBackend, R: RetryPolicy> BatchEngine<B, R> {
    /// Swap the write retry policy.
    pub fn with_retry<P: RetryPolicy>(self, retry: P) -> BatchEngine<B, P> {
        BatchEngine {
            config: self.config,
            client: self.client,
            retry,
            intake: self.intake,
            buffer: self.buffer,
            policy: self.policy,
            capacity: self.capacity,
            stats: self.stats,
        }
    }

    /// Shared counters, readable while the engine runs.
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Shared capacity flag, readable while the engine runs.
    pub fn capacity_state(&self) -> Arc<CapacityState> {
        Arc::clone(&self.capacity)
    }

    /// Delivery client used for all sheet calls.
    pub fn client(&self) -> &DeliveryClient<B> {
        &self.client
    }

    /// Run the engine.
    ///
    /// Fails immediately if the engine settings are invalid or the initial
    /// policy fetch or eviction pass fails; that is a failed start, not
    /// something to retry. Otherwise loops until
    /// every intake handle is dropped, then flushes what is left and returns.
    pub async fn run(mut self) -> Result<(), StartupError> {
        self.config.validate()?;

        self.policy = self
            .client
            .fetch_policy(self.config.policy_timeout())
            .await?;
        self.log_policy();

        let retired = self.client.evict(self.config.eviction_timeout()).await?;
        self.stats
            .rows_evicted
            .fetch_add(retired as u64, Ordering::Relaxed);
        tracing::info!(retired, "retired rows");

        tracing::info!(
            buffer_size = self.config.buffer_size,
            flush_interval_ms = self.config.flush_interval_ms,
            row_format = ?self.client.row_format(),
            "batch engine started"
        );

        let flush_period = self.config.flush_interval();
        let flush_timer = tokio::time::sleep(flush_period);
        tokio::pin!(flush_timer);

        let refresh_period = self.config.policy_refresh();
        let mut policy_ticker = interval_at(Instant::now() + refresh_period, refresh_period);
        policy_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let eviction_period = self.config.eviction_interval();
        let mut eviction_ticker = interval_at(Instant::now() + eviction_period, eviction_period);
        eviction_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.intake.recv() => match received {
                    Some(received) => {
                        if self.accept(received).await {
                            flush_timer.as_mut().reset(Instant::now() + flush_period);
                        }
                    }
                    None => {
                        tracing::info!(buffered = self.buffer.len(), "intake closed, flushing");
                        self.flush().await;
                        return Ok(());
                    }
                },
                () = &mut flush_timer => {
                    tracing::debug!("flush timer triggered");
                    self.flush().await;
                    flush_timer.as_mut().reset(Instant::now() + flush_period);
                }
                _ = policy_ticker.tick() => {
                    tracing::debug!("fetching policy");
                    self.refresh_policy().await;
                }
                _ = eviction_ticker.tick() => {
                    self.evict().await;
                }
            }
        }
    }

    /// Filter and buffer one sample. Returns true if a flush was attempted.
    async fn accept(&mut self, received: Received) -> bool {
        let Received {
            sample,
            received_at,
        } = received;

        if !self.policy.allows(&sample.metric_name) {
            return false;
        }

        // Age at receipt; time spent in the intake queue does not count
        let age = received_at.signed_duration_since(sample.timestamp);
        if age
            .to_std()
            .map_or(false, |age| age > self.config.stale_after())
        {
            self.stats.samples_stale.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                metric = %sample.metric_name,
                age_secs = age.num_seconds(),
                "dropping stale sample"
            );
            return false;
        }

        let mut flushed = false;
        if self.buffer.len() >= self.config.buffer_size {
            // Only reachable when a bounded retry policy gave up earlier
            self.flush().await;
            flushed = true;
            if self.buffer.len() >= self.config.buffer_size {
                tracing::warn!(
                    metric = %sample.metric_name,
                    "buffer still full after failed flush, dropping incoming sample"
                );
                return flushed;
            }
        }

        self.buffer.push(sample);
        self.stats.samples_buffered.fetch_add(1, Ordering::Relaxed);

        if self.buffer.len() >= self.config.buffer_size {
            tracing::debug!("buffer filled");
            self.flush().await;
            flushed = true;
        }
        flushed
    }

    /// Deliver the buffer. The buffer is cleared only on success.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let buffer = &self.buffer;
        let client = &self.client;
        let capacity = &*self.capacity;
        let stats = &*self.stats;
        let timeout = self.config.request_timeout();

        let result = retry(&self.retry, move |attempt| async move {
            let make_room = capacity.is_at_capacity();
            tracing::info!(rows = buffer.len(), attempt, make_room, "sending batch");

            client
                .write(buffer, make_room, timeout)
                .await
                .map_err(|e| {
                    stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                    if matches!(e, WriteError::SinkCapacity(_)) && capacity.mark() {
                        tracing::warn!("sheet reached its cell limit, making room before every append from now on");
                    }
                    tracing::error!(error = %e, "failed to send batch");
                    e
                })
        })
        .await;

        match result {
            Ok(()) => {
                let rows = self.buffer.len() as u64;
                self.buffer.clear();
                self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                self.stats.rows_flushed.fetch_add(rows, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    buffered = self.buffer.len(),
                    "retry policy gave up, keeping batch for the next flush"
                );
            }
        }
    }

    async fn refresh_policy(&mut self) {
        match self
            .client
            .fetch_policy(self.config.policy_timeout())
            .await
        {
            Ok(policy) => {
                self.policy = policy;
                self.log_policy();
            }
            Err(e) => {
                self.stats
                    .policy_refresh_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "failed to refresh policy, keeping previous one");
            }
        }
    }

    async fn evict(&mut self) {
        match self.client.evict(self.config.eviction_timeout()).await {
            Ok(retired) => {
                self.stats
                    .rows_evicted
                    .fetch_add(retired as u64, Ordering::Relaxed);
                tracing::info!(retired, "retired rows");
            }
            Err(e) => {
                self.stats.eviction_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "error trying to retire rows");
            }
        }
    }

    fn log_policy(&self) {
        if self.policy.allowed_metrics.is_empty() {
            tracing::warn!("policy allows no metrics, every sample is dropped until the next refresh");
        } else {
            tracing::debug!(
                metrics = self.policy.allowed_metrics.len(),
                retire_after = ?self.policy.retire_after,
                "policy updated"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemorySheet, SheetOp};
    use crate::config::DeliveryConfig;
    use crate::error::{BackendError, PolicyFetchError};
    use crate::config::ConfigError;
    use crate::retry::BoundedRetry;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn sheet_allowing(metrics: &str) -> MemorySheet {
        let sheet = MemorySheet::new();
        sheet.set_range(
            "Config!A:B",
            vec![vec!["METRICS".to_string(), metrics.to_string()]],
        );
        sheet
    }

    fn engine(
        sheet: &MemorySheet,
        buffer_size: usize,
    ) -> (BatchEngine<MemorySheet>, IntakeHandle) {
        engine_with(
            sheet,
            EngineConfig {
                buffer_size,
                ..EngineConfig::default()
            },
        )
    }

    fn engine_with(
        sheet: &MemorySheet,
        config: EngineConfig,
    ) -> (BatchEngine<MemorySheet>, IntakeHandle) {
        let client = DeliveryClient::new(sheet.clone(), &DeliveryConfig::default());
        BatchEngine::new(config, client)
    }

    fn sample(name: &str) -> Sample {
        Sample::new(name, BTreeMap::new(), 1.0, Utc::now())
    }

    fn appended_rows(sheet: &MemorySheet) -> Vec<usize> {
        sheet
            .append_batches()
            .iter()
            .flat_map(|batch| batch.iter())
            .filter_map(|op| match op {
                SheetOp::AppendRows(rows) => Some(rows.len()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_policy_failure_is_fatal() {
        let sheet = sheet_allowing("up");
        sheet.fail_next(BackendError::Transport("refused".to_string()));
        let (engine, _intake) = engine(&sheet, 3);

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, StartupError::Policy(PolicyFetchError::Sink(_))));
        assert!(sheet.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_eviction_failure_is_fatal() {
        let sheet = sheet_allowing("up");
        sheet.set_cell("Internal!B1", "not a number");
        let (engine, _intake) = engine(&sheet, 3);

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, StartupError::Eviction(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_fails_start_instead_of_panicking() {
        let sheet = sheet_allowing("up");
        let (engine, _intake) = engine_with(
            &sheet,
            EngineConfig {
                policy_refresh_secs: 0,
                ..EngineConfig::default()
            },
        );

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::Invalid(_))));
        assert!(err.to_string().contains("policy_refresh_secs"));
        assert!(sheet.reads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_flushes_once() {
        let sheet = sheet_allowing("up");
        let (engine, intake) = engine(&sheet, 3);
        let stats = engine.stats();

        for _ in 0..3 {
            intake.enqueue(sample("up")).await.unwrap();
        }
        drop(intake);
        engine.run().await.unwrap();

        assert_eq!(appended_rows(&sheet), vec![3]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_flushed, 1);
        assert_eq!(snapshot.rows_flushed, 3);
        assert_eq!(snapshot.samples_buffered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disallowed_and_stale_samples_are_dropped() {
        let sheet = sheet_allowing("cpu_usage");
        let (engine, intake) = engine(&sheet, 10);
        let stats = engine.stats();

        let stale = Sample::new(
            "cpu_usage",
            BTreeMap::new(),
            1.0,
            Utc::now() - chrono::Duration::minutes(6),
        );
        let recent = Sample::new(
            "cpu_usage",
            BTreeMap::new(),
            2.0,
            Utc::now() - chrono::Duration::minutes(4),
        );

        intake.enqueue(sample("mem_usage")).await.unwrap();
        intake.enqueue(stale).await.unwrap();
        intake.enqueue(recent).await.unwrap();
        intake.enqueue(sample("CPU_Usage")).await.unwrap();
        drop(intake);
        engine.run().await.unwrap();

        assert_eq!(appended_rows(&sheet), vec![2]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_stale, 1);
        assert_eq!(snapshot.samples_buffered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_keeps_batch() {
        let sheet = sheet_allowing("up");
        let (engine, intake) = engine(&sheet, 2);
        let engine = engine.with_retry(BoundedRetry::new(Duration::from_millis(10), 1));
        let stats = engine.stats();

        let task = tokio::spawn(engine.run());
        tokio::time::sleep(Duration::from_millis(1)).await;

        sheet.fail_next(BackendError::Transport("reset".to_string()));
        intake.enqueue(sample("up")).await.unwrap();
        intake.enqueue(sample("up")).await.unwrap();
        drop(intake);
        task.await.unwrap().unwrap();

        // The full-buffer flush gave up; the close-time flush resent the same batch
        let batches = sheet.append_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], batches[1]);
        assert_eq!(sheet.rows().len(), 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.flush_failures, 1);
        assert_eq!(snapshot.batches_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timer_sends_partial_batch() {
        let sheet = sheet_allowing("up");
        let (engine, intake) = engine(&sheet, 100);
        let task = tokio::spawn(engine.run());

        intake.enqueue(sample("up")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(sheet.append_batches().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(appended_rows(&sheet), vec![1]);

        drop(intake);
        task.await.unwrap().unwrap();
        assert_eq!(sheet.append_batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_refresh_failure_keeps_previous_policy() {
        let sheet = sheet_allowing("up");
        let (engine, intake) = engine_with(
            &sheet,
            EngineConfig {
                buffer_size: 100,
                eviction_interval_secs: 3600,
                ..EngineConfig::default()
            },
        );
        let stats = engine.stats();
        let task = tokio::spawn(engine.run());
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Next call is the refresh at 60s
        sheet.fail_next(BackendError::Transport("unreachable".to_string()));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(stats.snapshot().policy_refresh_failures, 1);

        intake.enqueue(sample("up")).await.unwrap();
        drop(intake);
        task.await.unwrap().unwrap();
        assert_eq!(appended_rows(&sheet), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_error_switches_to_room_making() {
        let sheet = sheet_allowing("up");
        let (engine, intake) = engine(&sheet, 2);
        let capacity = engine.capacity_state();
        let task = tokio::spawn(engine.run());
        tokio::time::sleep(Duration::from_millis(1)).await;

        sheet.fail_next(BackendError::Api {
            code: 400,
            message: format!("This action would {} of 10000000 cells.", crate::error::CELL_LIMIT_MARKER),
        });
        intake.enqueue(sample("up")).await.unwrap();
        intake.enqueue(sample("up")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(capacity.is_at_capacity());

        let batches = sheet.append_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1][0], SheetOp::DeleteRows { start: 0, end: 2 });

        drop(intake);
        task.await.unwrap().unwrap();
        assert!(capacity.is_at_capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disallowed_stale_sample_is_not_counted() {
        let sheet = sheet_allowing("up");
        let (engine, intake) = engine(&sheet, 10);
        let stats = engine.stats();

        let old = |name: &str| {
            Sample::new(
                name,
                BTreeMap::new(),
                1.0,
                Utc::now() - chrono::Duration::minutes(10),
            )
        };
        intake.enqueue(old("mem_usage")).await.unwrap();
        intake.enqueue(old("up")).await.unwrap();
        drop(intake);
        engine.run().await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_stale, 1);
        assert_eq!(snapshot.samples_buffered, 0);
        assert!(sheet.append_batches().is_empty());
    }
}
