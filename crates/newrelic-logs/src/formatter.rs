// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire payload for the New Relic Logs API.
//!
//! Batches are written in the "detailed" JSON shape, one block with shared
//! attributes followed by the individual entries:
//!
//! ```json
//! [{
//!   "common": {"attributes": {"application": "checkout", "plugin.type": "rust-newrelic-logs"}},
//!   "logs": [
//!     {"timestamp": 1700000000000, "message": "order placed", "attributes": {"level": "information"}}
//!   ]
//! }]
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::UNIX_EPOCH;

use crate::batch::Batch;
use crate::constants;
use crate::error::FormatError;
use crate::event::LogEvent;

/// Attribute names owned by the payload; user properties with these names
/// are nested under `properties.`, repeating the prefix until the name is
/// free so no user property is lost.
const RESERVED_ATTRIBUTES: [&str; 6] = [
    "timestamp",
    "message",
    "level",
    "error.class",
    "error.message",
    "error.stack",
];

pub trait BatchFormatter: Send + Sync {
    fn format(&self, batch: &Batch) -> Result<Vec<u8>, FormatError>;
}

#[derive(Serialize)]
struct Block<'a> {
    common: Common<'a>,
    logs: Vec<Entry<'a>>,
}

#[derive(Serialize)]
struct Common<'a> {
    attributes: CommonAttributes<'a>,
}

#[derive(Serialize)]
struct CommonAttributes<'a> {
    application: &'a str,
    #[serde(rename = "plugin.type")]
    plugin_type: &'static str,
    #[serde(rename = "plugin.version")]
    plugin_version: &'static str,
}

#[derive(Serialize)]
struct Entry<'a> {
    timestamp: u64,
    message: &'a str,
    attributes: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct NewRelicFormatter {
    application_name: String,
}

impl NewRelicFormatter {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
        }
    }

    fn entry(event: &LogEvent) -> Entry<'_> {
        let timestamp = event
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        let mut attributes = Map::with_capacity(event.properties.len() + 4);
        attributes.insert("level".to_string(), Value::from(event.level.as_str()));
        for (key, value) in &event.properties {
            if !RESERVED_ATTRIBUTES.contains(&key.as_str()) {
                attributes.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &event.properties {
            if RESERVED_ATTRIBUTES.contains(&key.as_str()) {
                let mut renamed = format!("properties.{key}");
                while attributes.contains_key(&renamed) {
                    renamed.insert_str(0, "properties.");
                }
                attributes.insert(renamed, value.clone());
            }
        }
        if let Some(error) = &event.error {
            attributes.insert("error.class".to_string(), Value::from(error.class.as_str()));
            attributes.insert(
                "error.message".to_string(),
                Value::from(error.message.as_str()),
            );
            if let Some(stack) = &error.stack {
                attributes.insert("error.stack".to_string(), Value::from(stack.as_str()));
            }
        }

        Entry {
            timestamp,
            message: &event.message,
            attributes,
        }
    }
}

impl BatchFormatter for NewRelicFormatter {
    fn format(&self, batch: &Batch) -> Result<Vec<u8>, FormatError> {
        let block = Block {
            common: Common {
                attributes: CommonAttributes {
                    application: &self.application_name,
                    plugin_type: constants::PLUGIN_TYPE,
                    plugin_version: crate::SINK_VERSION,
                },
            },
            logs: batch.events().iter().map(Self::entry).collect(),
        };
        Ok(serde_json::to_vec(&[block])?)
    }
}
