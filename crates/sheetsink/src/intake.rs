// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample intake.
//!
//! The handle a protocol decoder uses to pass samples to the batch engine.
//! The queue behind it is bounded: when it is full, producers wait. No
//! validation happens here; filtering is the engine's job. Each sample is
//! stamped with its receipt time on the way in, so the engine judges
//! staleness by when the sample arrived rather than when it was dequeued.

use crate::error::IntakeClosed;
use crate::sample::Sample;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// A sample waiting in the intake queue.
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub(crate) sample: Sample,
    pub(crate) received_at: DateTime<Utc>,
}

impl Received {
    fn now(sample: Sample) -> Self {
        Self {
            sample,
            received_at: Utc::now(),
        }
    }
}

/// Producer side of the engine's bounded intake queue.
///
/// Cheap to clone; the engine treats the intake as closed once every clone
/// has been dropped.
#[derive(Debug, Clone)]
pub struct IntakeHandle {
    tx: mpsc::Sender<Received>,
}

impl IntakeHandle {
    pub(crate) fn new(tx: mpsc::Sender<Received>) -> Self {
        Self { tx }
    }

    /// Queue one sample, waiting while the queue is full.
    pub async fn enqueue(&self, sample: Sample) -> Result<(), IntakeClosed> {
        self.tx
            .send(Received::now(sample))
            .await
            .map_err(|_| IntakeClosed)
    }

    /// Queue samples one by one, in order.
    ///
    /// Backpressure applies per sample, so a large request can be partly
    /// queued when the engine stops; the count of queued samples is not
    /// reported in that case.
    pub async fn enqueue_all<I>(&self, samples: I) -> Result<(), IntakeClosed>
    where
        I: IntoIterator<Item = Sample>,
    {
        for sample in samples {
            self.enqueue(sample).await?;
        }
        Ok(())
    }

    /// Queue one sample from a synchronous context.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_enqueue(&self, sample: Sample) -> Result<(), IntakeClosed> {
        self.tx
            .blocking_send(Received::now(sample))
            .map_err(|_| IntakeClosed)
    }

    /// Free slots in the queue right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// True once the engine has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
