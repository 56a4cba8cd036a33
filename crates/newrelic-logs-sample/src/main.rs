// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use serde_json::json;
use std::{env, io};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use newrelic_logs::{logger, ErrorDetails, Level, LogEvent, Sink, SinkOptions};

const DEFAULT_APP_NAME: &str = "NewRelicLogsSinkDev";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("NEW_RELIC_LOGS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Minimum level comes from NEW_RELIC_LOGS_MIN_LEVEL, defaulting to verbose.
    let mut options = SinkOptions::from_env();
    if options.application_name.is_none() {
        options.application_name = Some(DEFAULT_APP_NAME.to_string());
    }

    let sink = match Sink::from_options(options) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Error creating New Relic Logs sink: {e}");
            return;
        }
    };
    info!(
        "Shipping sample events for {} to {}",
        sink.config().application_name(),
        sink.config().endpoint_url()
    );

    sink.emit(
        LogEvent::new(Level::Information, "Message in a transaction")
            .with_property("SampleTransaction", "trans1"),
    );

    for level in [
        Level::Verbose,
        Level::Debug,
        Level::Information,
        Level::Warning,
    ] {
        sink.emit(
            LogEvent::new(level, format!("This is a simple {level} message {}", level as u8))
                .with_property("Level", level.as_str())
                .with_property("Val", level as u8),
        );
    }

    let started = Instant::now();
    sleep(Duration::from_secs(1)).await;
    sink.emit(
        LogEvent::new(Level::Information, "Completed timed sleep")
            .with_property("ElapsedMs", started.elapsed().as_millis() as u64),
    );

    // Producers on plain threads share the sink through a handle.
    let handle = sink.handle();
    let worker = std::thread::spawn(move || {
        for i in 0..100 {
            handle.emit(
                LogEvent::new(Level::Debug, format!("Worker iteration {i}"))
                    .with_property("Iteration", i),
            );
        }
    });
    if worker.join().is_err() {
        error!("Worker thread panicked");
    }

    let err = io::Error::new(
        io::ErrorKind::Other,
        "This is an exception raised to test the New Relic API",
    );
    sink.emit(
        LogEvent::new(Level::Error, "Error whilst testing the New Relic Logs sample")
            .with_error(ErrorDetails::from_error(&err)),
    );
    sink.emit(
        LogEvent::new(
            Level::Error,
            "A templated test message notifying of an error. Value 1",
        )
        .with_property("val", 1),
    );
    sink.emit(
        LogEvent::new(Level::Error, "Test with complex object and dictionary").with_property(
            "ComplexDictionary",
            json!({
                "property1": "WORKS!",
                "property2": 123,
                "property3": { "subpropertie": "blah blah" }
            }),
        ),
    );

    debug!("Disposing sink with {} pending events", sink.pending());
    sink.dispose().await;

    let stats = sink.stats();
    info!(
        "Sample finished: {} events enqueued, {} delivered, {} failed, {} dropped",
        stats.enqueued, stats.delivered_events, stats.failed_events, stats.dropped
    );
}
