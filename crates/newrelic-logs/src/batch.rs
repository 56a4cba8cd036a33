// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch accumulation.
//!
//! A flush cycle turns the queued events into batches of at most
//! `batch_size_limit` events and hands them to the delivery layer one at a
//! time. The next batch is only drained once the previous one has been
//! delivered or dropped, which keeps delivery ordered and at most one batch
//! in flight.
//!
//! The cycle's budget is the queue length when the cycle starts, capped at
//! `batch_size_limit × max_batches_per_cycle`. Events enqueued while the
//! cycle runs wait for the next one.

use std::sync::Arc;
use tracing::debug;

use crate::delivery::{DeliveryOutcome, RetryingDelivery};
use crate::event::LogEvent;
use crate::queue::EventQueue;
use crate::stats::Counters;

/// Ordered group of events shipped in one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    events: Vec<LogEvent>,
}

impl Batch {
    #[must_use]
    pub fn new(events: Vec<LogEvent>) -> Self {
        Self { events }
    }

    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<LogEvent> {
        self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Totals for one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub batches: usize,
    pub events: usize,
    pub delivered_batches: usize,
    pub failed_batches: usize,
}

impl CycleReport {
    fn record(&mut self, batch_len: usize, outcome: &DeliveryOutcome) {
        self.batches += 1;
        self.events += batch_len;
        if outcome.is_delivered() {
            self.delivered_batches += 1;
        } else {
            self.failed_batches += 1;
        }
    }

    fn merge(&mut self, other: CycleReport) {
        self.batches += other.batches;
        self.events += other.events;
        self.delivered_batches += other.delivered_batches;
        self.failed_batches += other.failed_batches;
    }
}

#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    batch_size_limit: usize,
    max_batches_per_cycle: usize,
    counters: Arc<Counters>,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(batch_size_limit: usize, max_batches_per_cycle: usize) -> Self {
        Self::with_counters(
            batch_size_limit,
            max_batches_per_cycle,
            Arc::new(Counters::default()),
        )
    }

    pub(crate) fn with_counters(
        batch_size_limit: usize,
        max_batches_per_cycle: usize,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            batch_size_limit: batch_size_limit.max(1),
            max_batches_per_cycle: max_batches_per_cycle.max(1),
            counters,
        }
    }

    #[must_use]
    pub fn batch_size_limit(&self) -> usize {
        self.batch_size_limit
    }

    /// One periodic cycle: ships what was queued when the cycle started, up
    /// to `max_batches_per_cycle` batches.
    pub async fn flush_cycle(&self, queue: &EventQueue, delivery: &RetryingDelivery) -> CycleReport {
        let cap = self.batch_size_limit.saturating_mul(self.max_batches_per_cycle);
        let budget = queue.len().min(cap);
        self.ship(queue, delivery, budget).await
    }

    /// Final flush: keeps cycling until the queue is empty, ignoring the
    /// per-cycle batch cap.
    pub async fn drain_all(&self, queue: &EventQueue, delivery: &RetryingDelivery) -> CycleReport {
        let mut report = CycleReport::default();
        loop {
            let pending = queue.len();
            if pending == 0 {
                break;
            }
            let cycle = self.ship(queue, delivery, pending).await;
            if cycle.batches == 0 {
                break;
            }
            report.merge(cycle);
        }
        report
    }

    async fn ship(&self, queue: &EventQueue, delivery: &RetryingDelivery, budget: usize) -> CycleReport {
        let mut report = CycleReport::default();
        let mut remaining = budget;

        while remaining > 0 {
            let events = queue.drain_up_to(self.batch_size_limit.min(remaining));
            if events.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(events.len());

            let batch = Batch::new(events);
            let outcome = delivery.deliver(&batch).await;
            self.count(&batch, &outcome);
            report.record(batch.len(), &outcome);
        }

        if report.batches > 0 {
            debug!(
                "NR_LOGS | Flushed {} events in {} batches ({} failed)",
                report.events, report.batches, report.failed_batches
            );
        }
        report
    }

    fn count(&self, batch: &Batch, outcome: &DeliveryOutcome) {
        if outcome.is_delivered() {
            Counters::incr(&self.counters.delivered_batches);
            Counters::add(&self.counters.delivered_events, batch.len());
        } else {
            Counters::incr(&self.counters.failed_batches);
            Counters::add(&self.counters.failed_events, batch.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::ScriptedClient;
    use crate::delivery::{DeliveryClient, RetryStrategy};
    use crate::error::DeliveryError;
    use crate::event::Level;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;
    use tokio_util::sync::CancellationToken;

    fn queue_with(messages: &[&str]) -> EventQueue {
        let queue = EventQueue::new(10_000, 10_000);
        for m in messages {
            queue.enqueue(LogEvent::new(Level::Information, *m));
        }
        queue
    }

    fn delivery(client: &Arc<ScriptedClient>) -> RetryingDelivery {
        RetryingDelivery::new(
            Arc::clone(client) as Arc<dyn DeliveryClient>,
            RetryStrategy::Immediate(3),
            CancellationToken::new(),
        )
    }

    fn strings(batches: &[&[&str]]) -> Vec<Vec<String>> {
        batches
            .iter()
            .map(|b| b.iter().map(|s| (*s).to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_single_batch_per_cycle_leaves_remainder() {
        let queue = queue_with(&["A", "B", "C"]);
        let client = Arc::new(ScriptedClient::default());
        let accumulator = BatchAccumulator::new(2, 1);

        let report = accumulator.flush_cycle(&queue, &delivery(&client)).await;

        assert_eq!(report.batches, 1);
        assert_eq!(client.delivered(), strings(&[&["A", "B"]]));
        assert_eq!(queue.len(), 1);

        accumulator.flush_cycle(&queue, &delivery(&client)).await;
        assert_eq!(client.delivered(), strings(&[&["A", "B"], &["C"]]));
    }

    #[tokio::test]
    async fn test_cycle_splits_on_batch_size() {
        let queue = queue_with(&["a", "b", "c", "d", "e"]);
        let client = Arc::new(ScriptedClient::default());

        let report = BatchAccumulator::new(2, 10)
            .flush_cycle(&queue, &delivery(&client))
            .await;

        assert_eq!(
            report,
            CycleReport {
                batches: 3,
                events: 5,
                delivered_batches: 3,
                failed_batches: 0,
            }
        );
        assert_eq!(
            client.delivered(),
            strings(&[&["a", "b"], &["c", "d"], &["e"]])
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_delivers_nothing() {
        let queue = queue_with(&[]);
        let client = Arc::new(ScriptedClient::default());

        let report = BatchAccumulator::new(2, 10)
            .flush_cycle(&queue, &delivery(&client))
            .await;

        assert_eq!(report, CycleReport::default());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_respects_max_batches() {
        let messages: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = messages.iter().map(String::as_str).collect();
        let queue = queue_with(&refs);
        let client = Arc::new(ScriptedClient::default());

        let report = BatchAccumulator::new(3, 2)
            .flush_cycle(&queue, &delivery(&client))
            .await;

        assert_eq!(report.batches, 2);
        assert_eq!(report.events, 6);
        assert_eq!(queue.len(), 4);
    }

    #[tokio::test]
    async fn test_drain_all_ignores_cap() {
        let messages: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = messages.iter().map(String::as_str).collect();
        let queue = queue_with(&refs);
        let client = Arc::new(ScriptedClient::default());

        let report = BatchAccumulator::new(3, 1)
            .drain_all(&queue, &delivery(&client))
            .await;

        assert_eq!(report.batches, 4);
        assert_eq!(report.events, 10);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_cycle() {
        let queue = queue_with(&["a", "b", "c", "d"]);
        let client = Arc::new(ScriptedClient::new(vec![Err(DeliveryError::permanent(
            Some(400),
            "bad request",
        ))]));
        let counters = Arc::new(Counters::default());

        let report = BatchAccumulator::with_counters(2, 10, Arc::clone(&counters))
            .flush_cycle(&queue, &delivery(&client))
            .await;

        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.delivered_batches, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.delivered(), strings(&[&["c", "d"]]));
        let stats = counters.snapshot();
        assert_eq!(stats.failed_events, 2);
        assert_eq!(stats.delivered_events, 2);
    }

    /// Enqueues more events into the queue it is flushing, once.
    struct RefillingClient {
        queue: Arc<EventQueue>,
        refill: std::sync::Mutex<Vec<&'static str>>,
        batches: std::sync::Mutex<Vec<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl DeliveryClient for RefillingClient {
        async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            for m in self.refill.lock().unwrap().drain(..) {
                self.queue.enqueue(LogEvent::new(Level::Information, m));
            }
            self.batches
                .lock()
                .unwrap()
                .push(batch.events().iter().map(|e| e.message.clone()).collect());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_enqueued_mid_cycle_wait_for_next_cycle() {
        let queue = Arc::new(queue_with(&["a", "b", "c"]));
        let client = Arc::new(RefillingClient {
            queue: Arc::clone(&queue),
            refill: std::sync::Mutex::new(vec!["x", "y", "z"]),
            batches: std::sync::Mutex::new(Vec::new()),
        });
        let delivery = RetryingDelivery::new(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            RetryStrategy::Immediate(1),
            CancellationToken::new(),
        );
        let accumulator = BatchAccumulator::new(2, 5);

        let report = accumulator.flush_cycle(&queue, &delivery).await;

        assert_eq!(report.events, 3);
        assert_eq!(
            *client.batches.lock().unwrap(),
            strings(&[&["a", "b"], &["c"]])
        );
        assert_eq!(queue.len(), 3);

        accumulator.flush_cycle(&queue, &delivery).await;
        assert_eq!(
            *client.batches.lock().unwrap(),
            strings(&[&["a", "b"], &["c"], &["x", "y"], &["z"]])
        );
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn prop_every_event_delivered_once_in_order(
            count in 0usize..200,
            batch_size_limit in 1usize..20,
            max_batches in 1usize..20,
        ) {
            let count = count.min(batch_size_limit * max_batches);
            let messages: Vec<String> = (0..count).map(|i| i.to_string()).collect();
            let refs: Vec<&str> = messages.iter().map(String::as_str).collect();
            let queue = queue_with(&refs);
            let client = Arc::new(ScriptedClient::default());
            let accumulator = BatchAccumulator::new(batch_size_limit, max_batches);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(accumulator.flush_cycle(&queue, &delivery(&client)));

            let delivered = client.delivered();
            prop_assert!(delivered.iter().all(|b| !b.is_empty() && b.len() <= batch_size_limit));
            let flat: Vec<String> = delivered.into_iter().flatten().collect();
            prop_assert_eq!(flat, messages);
            prop_assert!(queue.is_empty());
        }
    }
}
