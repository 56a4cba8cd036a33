// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and limits for the New Relic Logs sink.
//!
//! The New Relic Logs API accepts payloads up to 1MB compressed; the batch
//! defaults below keep a typical batch well inside that budget.

use std::time::Duration;

/// Production ingestion endpoint (US region).
pub const DEFAULT_ENDPOINT_URL: &str = "https://log-api.newrelic.com/log/v1";

/// Maximum number of events packed into one batch.
///
/// # Value: 1,000 entries
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 1_000;

/// Delay between the end of one flush cycle and the start of the next.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// Maximum number of batches a single periodic flush cycle ships.
///
/// Bounds the length of one cycle when producers outpace delivery; the
/// remainder waits for the next cycle. The final flush on disposal ignores
/// this cap.
pub const DEFAULT_MAX_BATCHES_PER_CYCLE: usize = 10;

/// Maximum number of events held in memory before the oldest are evicted.
///
/// # Value: 50,000 entries
///
/// Assuming ~1KB per event this is ~50MB of buffered logs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50_000;

/// Number of delivery attempts per batch for transient failures.
pub const FLUSH_RETRY_COUNT: usize = 3;

/// Base delay between delivery attempts, in milliseconds.
pub const FLUSH_RETRY_DELAY_MS: u64 = 100;

/// Per-attempt HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings key resolving the application name when it is not passed
/// explicitly.
pub const APP_NAME_SETTING: &str = "NEW_RELIC_APP_NAME";

/// Header carrying an APM license key.
pub const LICENSE_KEY_HEADER: &str = "X-License-Key";

/// Header carrying an Insert API key.
pub const INSERT_KEY_HEADER: &str = "X-Insert-Key";

/// Value of the `plugin.type` common attribute.
pub const PLUGIN_TYPE: &str = "rust-newrelic-logs";
