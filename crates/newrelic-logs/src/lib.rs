// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # New Relic Logs sink
//!
//! A periodic batching sink that accepts structured log events from any
//! number of application threads, buffers them in memory and ships them in
//! batches to the New Relic Logs ingestion endpoint.
//!
//! ```text
//!   producers ──emit──▶ EventQueue ──drain──▶ BatchAccumulator
//!                           │                       │
//!                      early wake                 Batch
//!                           ▼                       ▼
//!                    FlushScheduler ──────▶ RetryingDelivery ──▶ HTTP POST
//! ```
//!
//! - [`queue`]: bounded multi-producer holding area (drop-oldest on overflow)
//! - [`batch`]: drains the queue into ordered, size-bounded batches
//! - [`scheduler`]: the single background task driving flush cycles
//! - [`delivery`]: the delivery seam, retry policy and HTTP client
//! - [`sink`]: the public facade owning the lifecycle
//!
//! ```rust,no_run
//! use newrelic_logs::{Level, LogEvent, Sink, SinkConfig, SinkOptions};
//!
//! # async fn run() -> Result<(), newrelic_logs::ConfigError> {
//! let config = SinkConfig::new(SinkOptions {
//!     application_name: Some("checkout".to_string()),
//!     license_key: Some("my-license-key".to_string()),
//!     ..Default::default()
//! })?;
//! let sink = Sink::new(config)?;
//! sink.emit(LogEvent::new(Level::Information, "order placed"));
//! sink.dispose().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod event;
pub mod formatter;
pub mod http;
pub mod logger;
pub mod queue;
pub mod scheduler;
pub mod sink;
pub mod stats;

pub use batch::{Batch, BatchAccumulator, CycleReport};
pub use config::{Credential, EnvSettings, SettingsSource, SinkConfig, SinkOptions};
pub use delivery::{
    DeliveryClient, DeliveryOutcome, HttpDeliveryClient, RetryStrategy, RetryingDelivery,
};
pub use error::{ConfigError, DeliveryError, FormatError};
pub use event::{ErrorDetails, Level, LogEvent};
pub use formatter::{BatchFormatter, NewRelicFormatter};
pub use sink::{Sink, SinkHandle};
pub use stats::SinkStats;

/// Sink version reported in the payload's common attributes.
pub const SINK_VERSION: &str = env!("CARGO_PKG_VERSION");
