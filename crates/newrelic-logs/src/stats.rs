// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic counters shared between producers and the flush task.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) filtered: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) delivered_batches: AtomicU64,
    pub(crate) delivered_events: AtomicU64,
    pub(crate) failed_batches: AtomicU64,
    pub(crate) failed_events: AtomicU64,
}

impl Counters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SinkStats {
        SinkStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            failed_events: self.failed_events.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a sink's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Events below the minimum level.
    pub filtered: u64,
    /// Events evicted because the queue was full.
    pub dropped: u64,
    /// Events emitted after the sink was disposed.
    pub rejected: u64,
    pub delivered_batches: u64,
    pub delivered_events: u64,
    /// Batches discarded after a permanent error or exhausted retries.
    pub failed_batches: u64,
    pub failed_events: u64,
}
