// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer event queue.
//!
//! Producers push under a short `std::sync::Mutex` critical section and
//! never wait on the consumer. When the queue is full the oldest event is
//! evicted so memory stays bounded under sustained outages:
//!
//! 1. The front event is removed and dropped
//! 2. A warning is logged once per overflow episode
//! 3. The `dropped` counter is incremented
//! 4. The new event is added to the back of the queue

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::event::LogEvent;
use crate::stats::Counters;

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<LogEvent>,
    closed: bool,
    overflowing: bool,
}

#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    /// Queue length at which the scheduler is woken early.
    full_batch: usize,
    backed_up: Notify,
    counters: Arc<Counters>,
}

impl EventQueue {
    #[must_use]
    pub fn new(capacity: usize, full_batch: usize) -> Self {
        Self::with_counters(capacity, full_batch, Arc::new(Counters::default()))
    }

    pub(crate) fn with_counters(capacity: usize, full_batch: usize, counters: Arc<Counters>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            full_batch: full_batch.max(1),
            backed_up: Notify::new(),
            counters,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A producer panicking mid-push leaves the deque consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `event`. Never blocks beyond the push itself and never fails:
    /// overflow evicts the oldest event, a closed queue drops the new one.
    pub fn enqueue(&self, event: LogEvent) {
        let (evicted, first_eviction, reached_full_batch) = {
            let mut state = self.lock();
            if state.closed {
                drop(state);
                Counters::incr(&self.counters.rejected);
                debug!("NR_LOGS | Sink is disposed, dropping event");
                return;
            }

            let mut evicted = false;
            let mut first_eviction = false;
            if state.events.len() >= self.capacity {
                state.events.pop_front();
                evicted = true;
                first_eviction = !state.overflowing;
                state.overflowing = true;
            }
            state.events.push_back(event);
            (evicted, first_eviction, state.events.len() == self.full_batch)
        };

        Counters::incr(&self.counters.enqueued);
        if evicted {
            Counters::incr(&self.counters.dropped);
            if first_eviction {
                warn!(
                    "NR_LOGS | Event queue is full ({} events), dropping oldest events until the next flush",
                    self.capacity
                );
            }
        }
        if reached_full_batch {
            self.backed_up.notify_one();
        }
    }

    /// Removes and returns up to `n` events in insertion order.
    pub fn drain_up_to(&self, n: usize) -> Vec<LogEvent> {
        let mut state = self.lock();
        let take = n.min(state.events.len());
        let drained: Vec<LogEvent> = state.events.drain(..take).collect();
        if state.events.len() < self.capacity {
            state.overflowing = false;
        }
        drained
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Resolves once a full batch has accumulated since the last wake.
    pub async fn backed_up(&self) {
        self.backed_up.notified().await;
    }

    /// Stops accepting events. Queued events remain drainable.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of events evicted by overflow so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.snapshot().dropped
    }
}
