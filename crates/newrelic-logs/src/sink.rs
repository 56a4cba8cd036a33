// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public entry point owning the queue and the background flush task.
//!
//! # Graceful Shutdown
//!
//! [`Sink::dispose`] performs drain-then-stop-then-release:
//! 1. The queue stops accepting events
//! 2. The cancellation token is triggered
//! 3. The scheduler finishes its current cycle and drains the queue
//! 4. `dispose` returns once the background task has completed

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::batch::{BatchAccumulator, CycleReport};
use crate::config::{SinkConfig, SinkOptions};
use crate::delivery::{DeliveryClient, HttpDeliveryClient, RetryingDelivery};
use crate::error::ConfigError;
use crate::event::LogEvent;
use crate::queue::EventQueue;
use crate::scheduler::{FlushScheduler, SchedulerState};
use crate::stats::{Counters, SinkStats};

#[derive(Debug)]
struct Shared {
    config: Arc<SinkConfig>,
    queue: Arc<EventQueue>,
    counters: Arc<Counters>,
    cancel_token: CancellationToken,
}

impl Shared {
    fn emit(&self, event: LogEvent) {
        if event.level < self.config.minimum_level() {
            Counters::incr(&self.counters.filtered);
            return;
        }
        self.queue.enqueue(event);
    }
}

/// Cloneable, emit-only handle for producer threads.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    shared: Arc<Shared>,
}

impl SinkHandle {
    pub fn emit(&self, event: LogEvent) {
        self.shared.emit(event);
    }
}

/// A New Relic Logs sink: one queue, one flush task, one configuration.
pub struct Sink {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<CycleReport>>>,
    state: watch::Receiver<SchedulerState>,
}

impl Sink {
    /// Builds a sink delivering over HTTP. Fails with
    /// [`ConfigError::MissingRuntime`] outside a tokio runtime.
    pub fn new(config: SinkConfig) -> Result<Self, ConfigError> {
        tokio::runtime::Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;
        let client = HttpDeliveryClient::new(&config)?;
        Self::with_delivery(config, Arc::new(client))
    }

    /// Validates `options` and builds an HTTP sink.
    pub fn from_options(options: SinkOptions) -> Result<Self, ConfigError> {
        Self::new(SinkConfig::new(options)?)
    }

    /// Builds a sink on top of any delivery client. The flush task is
    /// spawned on the current tokio runtime.
    pub fn with_delivery(
        config: SinkConfig,
        client: Arc<dyn DeliveryClient>,
    ) -> Result<Self, ConfigError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;
        let config = Arc::new(config);
        let counters = Arc::new(Counters::default());
        let queue = Arc::new(EventQueue::with_counters(
            config.queue_capacity(),
            config.batch_size_limit(),
            Arc::clone(&counters),
        ));
        let cancel_token = CancellationToken::new();

        let delivery = RetryingDelivery::new(
            client,
            config.retry_strategy().clone(),
            cancel_token.clone(),
        );
        let accumulator = BatchAccumulator::with_counters(
            config.batch_size_limit(),
            config.max_batches_per_cycle(),
            Arc::clone(&counters),
        );
        let (scheduler, state) = FlushScheduler::new(
            Arc::clone(&queue),
            accumulator,
            delivery,
            config.period(),
            cancel_token.clone(),
        );
        let task = runtime.spawn(scheduler.run());

        debug!(
            "NR_LOGS | Sink started for application {} (batch size {}, period {} ms)",
            config.application_name(),
            config.batch_size_limit(),
            config.period().as_millis()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                queue,
                counters,
                cancel_token,
            }),
            task: Mutex::new(Some(task)),
            state,
        })
    }

    /// Queues `event` for delivery. Never blocks on the network and never
    /// fails; events below the minimum level or emitted after disposal are
    /// discarded.
    pub fn emit(&self, event: LogEvent) {
        self.shared.emit(event);
    }

    #[must_use]
    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SinkConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn stats(&self) -> SinkStats {
        self.shared.counters.snapshot()
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Number of events waiting for the next flush cycle.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops the sink after flushing everything queued. Calling it again, or
    /// concurrently, waits for the same shutdown and has no further effect.
    pub async fn dispose(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.shared.queue.close();
        self.shared.cancel_token.cancel();

        match handle.await {
            Ok(report) => debug!(
                "NR_LOGS | Sink disposed, final flush shipped {} events in {} batches ({} failed)",
                report.events, report.batches, report.failed_batches
            ),
            Err(e) => error!("NR_LOGS | Flush task failed during dispose: {}", e),
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        // Without an explicit dispose the flush task drains in the background.
        if self.task.get_mut().is_some() {
            self.shared.queue.close();
            self.shared.cancel_token.cancel();
        }
    }
}
