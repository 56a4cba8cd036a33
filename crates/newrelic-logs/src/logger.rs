// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` formatter for the sink's own diagnostics.
//!
//! Lines look like:
//! ```text
//! NR_LOGS | WARN | Event queue is full (50000 events), dropping oldest events
//! NR_LOGS | DEBUG | flush{cycle=3}: Sending 1000 events (18233 bytes)
//! ```
//!
//! Every line starts with the `NR_LOGS | LEVEL |` prefix. Messages emitted by
//! the sink already carry `NR_LOGS |`, which is stripped from the message
//! so the marker appears once.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

const PREFIX: &str = "NR_LOGS";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        let mut message = String::new();
        ctx.field_format()
            .format_fields(format::Writer::new(&mut message), event)?;
        let message = message
            .strip_prefix(PREFIX)
            .and_then(|m| m.strip_prefix(" | "))
            .unwrap_or(&message);
        writeln!(writer, "{message}")
    }
}
