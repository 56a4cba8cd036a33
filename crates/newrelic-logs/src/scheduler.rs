// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The background flush loop.
//!
//! ```text
//!        ┌──────── period / full batch ────────┐
//!        │                                     v
//!   ┌─────────┐                          ┌──────────┐
//!   │  Idle   │ <──── cycle complete ─── │ Flushing │
//!   └────┬────┘                          └──────────┘
//!        │ stop
//!        v
//!   final drain ──> Stopped
//! ```
//!
//! One scheduler runs per sink on its own task, so flush cycles never
//! overlap. The next wake is computed after a cycle ends (fixed delay),
//! unless the cycle left at least one full batch queued, in which case the
//! next cycle starts right away. A stop signal that arrives mid-cycle is
//! observed once the cycle completes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{BatchAccumulator, CycleReport};
use crate::delivery::RetryingDelivery;
use crate::queue::EventQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Flushing,
    Stopped,
}

pub struct FlushScheduler {
    queue: Arc<EventQueue>,
    accumulator: BatchAccumulator,
    delivery: RetryingDelivery,
    period: Duration,
    cancel_token: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl FlushScheduler {
    /// Returns the scheduler (to be spawned) and a receiver observing its
    /// state.
    #[must_use]
    pub fn new(
        queue: Arc<EventQueue>,
        accumulator: BatchAccumulator,
        delivery: RetryingDelivery,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> (Self, watch::Receiver<SchedulerState>) {
        let (state, state_rx) = watch::channel(SchedulerState::Idle);
        let scheduler = Self {
            queue,
            accumulator,
            delivery,
            period,
            cancel_token,
            state,
        };
        (scheduler, state_rx)
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Runs flush cycles until cancelled, then drains the queue. Returns the
    /// report of the final drain.
    pub async fn run(self) -> CycleReport {
        debug!("NR_LOGS | Flush scheduler started");

        let mut backlog = false;
        loop {
            if backlog {
                if self.cancel_token.is_cancelled() {
                    debug!("NR_LOGS | Received shutdown signal, flushing remaining events");
                    break;
                }
                debug!(
                    "NR_LOGS | {} events still queued after capped cycle, flushing again",
                    self.queue.len()
                );
            } else {
                tokio::select! {
                    biased;
                    () = self.cancel_token.cancelled() => {
                        debug!("NR_LOGS | Received shutdown signal, flushing remaining events");
                        break;
                    }
                    () = tokio::time::sleep(self.period) => {}
                    () = self.queue.backed_up() => {
                        debug!("NR_LOGS | Full batch waiting, flushing early");
                    }
                }
            }

            self.set_state(SchedulerState::Flushing);
            self.accumulator
                .flush_cycle(&self.queue, &self.delivery)
                .await;
            self.set_state(SchedulerState::Idle);

            // A full batch left behind by the per-cycle cap counts as backed up.
            backlog = self.queue.len() >= self.accumulator.batch_size_limit();
        }

        self.set_state(SchedulerState::Flushing);
        let report = self
            .accumulator
            .drain_all(&self.queue, &self.delivery)
            .await;
        self.set_state(SchedulerState::Stopped);
        debug!(
            "NR_LOGS | Flush scheduler stopped after final flush of {} events",
            report.events
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::ScriptedClient;
    use crate::delivery::{DeliveryClient, RetryStrategy};
    use crate::error::DeliveryError;
    use crate::event::{Level, LogEvent};
    use crate::Batch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    struct Harness {
        queue: Arc<EventQueue>,
        cancel: CancellationToken,
        state: watch::Receiver<SchedulerState>,
        task: JoinHandle<CycleReport>,
    }

    fn spawn_scheduler(
        client: Arc<dyn DeliveryClient>,
        batch_size_limit: usize,
        max_batches_per_cycle: usize,
        period: Duration,
        strategy: RetryStrategy,
    ) -> Harness {
        let queue = Arc::new(EventQueue::new(10_000, batch_size_limit));
        let cancel = CancellationToken::new();
        let delivery = RetryingDelivery::new(client, strategy, cancel.clone());
        let (scheduler, state) = FlushScheduler::new(
            Arc::clone(&queue),
            BatchAccumulator::new(batch_size_limit, max_batches_per_cycle),
            delivery,
            period,
            cancel.clone(),
        );
        let task = tokio::spawn(scheduler.run());
        Harness {
            queue,
            cancel,
            state,
            task,
        }
    }

    fn emit(queue: &EventQueue, messages: &[&str]) {
        for m in messages {
            queue.enqueue(LogEvent::new(Level::Information, *m));
        }
    }

    fn strings(batches: &[&[&str]]) -> Vec<Vec<String>> {
        batches
            .iter()
            .map(|b| b.iter().map(|s| (*s).to_string()).collect())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_batch_per_tick() {
        let client = Arc::new(ScriptedClient::default());
        let harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            2,
            1,
            Duration::from_secs(1),
            RetryStrategy::Immediate(3),
        );

        emit(&harness.queue, &["A", "B", "C"]);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.delivered(), strings(&[&["A", "B"]]));
        assert_eq!(harness.queue.len(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.delivered(), strings(&[&["A", "B"], &["C"]]));

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_flushes_partial_batch() {
        let client = Arc::new(ScriptedClient::default());
        let harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            100,
            10,
            Duration::from_secs(2),
            RetryStrategy::Immediate(3),
        );

        emit(&harness.queue, &["x", "y"]);
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(client.delivered().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.delivered(), strings(&[&["x", "y"]]));

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_drains_everything() {
        let client = Arc::new(ScriptedClient::default());
        let mut harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            3,
            1,
            Duration::from_secs(60),
            RetryStrategy::Immediate(3),
        );
        tokio::task::yield_now().await;

        let messages: Vec<String> = (0..7).map(|i| i.to_string()).collect();
        for m in &messages {
            harness.queue.enqueue(LogEvent::new(Level::Information, m.as_str()));
        }
        harness.cancel.cancel();
        let report = harness.task.await.unwrap();

        let flat: Vec<String> = client.delivered().into_iter().flatten().collect();
        assert_eq!(flat, messages);
        assert!(harness.queue.is_empty());
        assert_eq!(report.events, 7);
        harness.state.changed().await.ok();
        assert_eq!(*harness.state.borrow(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failures_do_not_block() {
        let client = Arc::new(ScriptedClient::always(
            Err(DeliveryError::permanent(Some(401), "unauthorized")),
            1_000,
        ));
        let harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            10,
            10,
            Duration::from_secs(1),
            RetryStrategy::LinearBackoff(3, 100),
        );

        emit(&harness.queue, &["a"]);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        emit(&harness.queue, &["b"]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_cycle_backlog_flushes_without_waiting_for_period() {
        let client = Arc::new(ScriptedClient::default());
        let harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            2,
            1,
            Duration::from_secs(10),
            RetryStrategy::Immediate(1),
        );

        // Length passes 2 once, the remaining full batches never re-signal.
        emit(&harness.queue, &["a", "b", "c", "d", "e", "f", "g", "h"]);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            client.delivered(),
            strings(&[&["a", "b"], &["c", "d"], &["e", "f"], &["g", "h"]])
        );
        assert!(harness.queue.is_empty());

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_remainder_waits_for_period() {
        let client = Arc::new(ScriptedClient::default());
        let harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            2,
            1,
            Duration::from_secs(10),
            RetryStrategy::Immediate(1),
        );

        emit(&harness.queue, &["a", "b", "c", "d", "e"]);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.delivered(), strings(&[&["a", "b"], &["c", "d"]]));
        assert_eq!(harness.queue.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            client.delivered(),
            strings(&[&["a", "b"], &["c", "d"], &["e"]])
        );

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    /// Holds every delivery until released; records the peak concurrency.
    #[derive(Default)]
    struct SlowClient {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delivered: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DeliveryClient for SlowClient {
        async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            self.delivered.lock().unwrap().push(batch.len());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_delivery_never_overlaps() {
        let client = Arc::new(SlowClient::default());
        let harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            1,
            5,
            Duration::from_millis(100),
            RetryStrategy::Immediate(1),
        );

        for i in 0..20 {
            harness
                .queue
                .enqueue(LogEvent::new(Level::Information, i.to_string()));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        harness.cancel.cancel();
        harness.task.await.unwrap();

        assert_eq!(client.peak.load(Ordering::SeqCst), 1);
        assert_eq!(client.delivered.lock().unwrap().iter().sum::<usize>(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_flushing_completes_cycle_then_drains() {
        let client = Arc::new(SlowClient::default());
        let mut harness = spawn_scheduler(
            Arc::clone(&client) as Arc<dyn DeliveryClient>,
            2,
            1,
            Duration::from_secs(1),
            RetryStrategy::Immediate(1),
        );

        emit(&harness.queue, &["a", "b"]);
        harness
            .state
            .wait_for(|s| *s == SchedulerState::Flushing)
            .await
            .unwrap();
        emit(&harness.queue, &["c"]);
        harness.cancel.cancel();
        harness.task.await.unwrap();

        assert_eq!(*client.delivered.lock().unwrap(), vec![2, 1]);
        assert_eq!(client.peak.load(Ordering::SeqCst), 1);
    }
}
