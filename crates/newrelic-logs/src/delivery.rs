// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery seam between the batching core and the transport.
//!
//! ```text
//!   Batch
//!     │
//!     v
//!   ┌──────────────────┐
//!   │ RetryingDelivery │ (bounded retries, transient errors only)
//!   └────────┬─────────┘
//!            │
//!            v
//!   ┌──────────────────┐
//!   │  DeliveryClient  │ (one attempt: format, POST, classify)
//!   └──────────────────┘
//! ```
//!
//! Every outcome ends with the batch being discarded: a delivered batch is
//! done, a dropped one is reported through `tracing` and never re-enters the
//! event pipeline.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::error::DeliveryError;

pub use crate::http::HttpDeliveryClient;

/// Performs a single delivery attempt of one batch.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: DeliveryClient + ?Sized> DeliveryClient for Arc<T> {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        (**self).deliver(batch).await
    }
}

/// How many attempts a batch gets and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Number of attempts, retried without delay.
    Immediate(usize),
    /// Number of attempts and base delay in milliseconds; the wait before
    /// attempt `n + 1` is `n × delay`.
    LinearBackoff(usize, u64),
}

impl RetryStrategy {
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    /// Wait after the `attempt`-th failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Duration::from_millis(delay_ms.saturating_mul(attempt as u64))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: usize },
    Dropped { attempts: usize, error: DeliveryError },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Dropped { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Applies a [`RetryStrategy`] on top of a [`DeliveryClient`].
///
/// Retries happen inside the caller's await, so the flush cycle does not
/// move on until the batch is delivered or dropped. Once `cancel` fires the
/// in-progress attempt is allowed to finish but no further attempt starts.
#[derive(Clone)]
pub struct RetryingDelivery {
    client: Arc<dyn DeliveryClient>,
    strategy: RetryStrategy,
    cancel: CancellationToken,
}

impl RetryingDelivery {
    pub fn new(
        client: Arc<dyn DeliveryClient>,
        strategy: RetryStrategy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            strategy,
            cancel,
        }
    }

    pub async fn deliver(&self, batch: &Batch) -> DeliveryOutcome {
        let max_attempts = self.strategy.attempts();
        let mut attempts = 0;

        loop {
            let time = Instant::now();
            attempts += 1;
            let result = self.client.deliver(batch).await;
            let elapsed = time.elapsed();

            let error = match result {
                Ok(()) => {
                    debug!(
                        "NR_LOGS | Delivered batch of {} events in {} ms ({} attempts)",
                        batch.len(),
                        elapsed.as_millis(),
                        attempts
                    );
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                error!(
                    "NR_LOGS | Dropping batch of {} events, not retrying: {}",
                    batch.len(),
                    error
                );
                return DeliveryOutcome::Dropped { attempts, error };
            }

            if attempts >= max_attempts {
                error!(
                    "NR_LOGS | Dropping batch of {} events after {} ms and {} attempts: {}",
                    batch.len(),
                    elapsed.as_millis(),
                    attempts,
                    error
                );
                return DeliveryOutcome::Dropped { attempts, error };
            }

            if self.cancel.is_cancelled() {
                warn!(
                    "NR_LOGS | Sink is stopping, dropping batch of {} events after {} attempts: {}",
                    batch.len(),
                    attempts,
                    error
                );
                return DeliveryOutcome::Dropped { attempts, error };
            }

            let delay = self.strategy.delay_after(attempts);
            debug!(
                "NR_LOGS | Attempt {} of {} failed, retrying in {} ms: {}",
                attempts,
                max_attempts,
                delay.as_millis(),
                error
            );
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        warn!(
                            "NR_LOGS | Sink is stopping, dropping batch of {} events after {} attempts: {}",
                            batch.len(),
                            attempts,
                            error
                        );
                        return DeliveryOutcome::Dropped { attempts, error };
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
