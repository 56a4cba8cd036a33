// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink configuration: caller-facing options, settings lookup and the
//! validated, immutable [`SinkConfig`].

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::constants;
use crate::delivery::RetryStrategy;
use crate::error::ConfigError;
use crate::event::Level;

/// External key/value settings consulted for values not passed explicitly.
pub trait SettingsSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads settings from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Credential sent with every request. Exactly one is used per sink.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    LicenseKey(String),
    InsertKey(String),
}

impl Credential {
    #[must_use]
    pub fn header_name(&self) -> &'static str {
        match self {
            Credential::LicenseKey(_) => constants::LICENSE_KEY_HEADER,
            Credential::InsertKey(_) => constants::INSERT_KEY_HEADER,
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Credential::LicenseKey(key) | Credential::InsertKey(key) => key,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::LicenseKey(_) => write!(f, "LicenseKey(***)"),
            Credential::InsertKey(_) => write!(f, "InsertKey(***)"),
        }
    }
}

/// Options accepted when building a sink.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub endpoint_url: String,
    /// Falls back to the `NEW_RELIC_APP_NAME` setting when unset or blank.
    pub application_name: Option<String>,
    pub license_key: Option<String>,
    pub insert_key: Option<String>,
    pub minimum_level: Level,
    pub batch_size_limit: usize,
    pub period: Duration,
    pub max_batches_per_cycle: usize,
    pub queue_capacity: usize,
    pub retry_strategy: RetryStrategy,
    pub request_timeout: Duration,
    pub https_proxy: Option<String>,
    pub use_compression: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            endpoint_url: constants::DEFAULT_ENDPOINT_URL.to_string(),
            application_name: None,
            license_key: None,
            insert_key: None,
            minimum_level: Level::Verbose,
            batch_size_limit: constants::DEFAULT_BATCH_SIZE_LIMIT,
            period: constants::DEFAULT_PERIOD,
            max_batches_per_cycle: constants::DEFAULT_MAX_BATCHES_PER_CYCLE,
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            retry_strategy: RetryStrategy::LinearBackoff(
                constants::FLUSH_RETRY_COUNT,
                constants::FLUSH_RETRY_DELAY_MS,
            ),
            request_timeout: constants::DEFAULT_REQUEST_TIMEOUT,
            https_proxy: None,
            use_compression: true,
        }
    }
}

impl SinkOptions {
    /// Options from environment variables. Unparsable values keep their
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_settings(&EnvSettings)
    }

    pub fn from_settings(settings: &dyn SettingsSource) -> Self {
        let defaults = Self::default();
        let endpoint_url = settings
            .get("NEW_RELIC_LOGS_ENDPOINT")
            .unwrap_or(defaults.endpoint_url);
        let batch_size_limit = settings
            .get("NEW_RELIC_LOGS_BATCH_SIZE")
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.batch_size_limit);
        let period = settings
            .get("NEW_RELIC_LOGS_PERIOD_MS")
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.period, Duration::from_millis);
        let minimum_level = settings
            .get("NEW_RELIC_LOGS_MIN_LEVEL")
            .and_then(|val| val.parse::<Level>().ok())
            .unwrap_or(defaults.minimum_level);
        let https_proxy = settings
            .get("NEW_RELIC_PROXY_HTTPS")
            .or_else(|| settings.get("HTTPS_PROXY"));

        Self {
            endpoint_url,
            application_name: settings.get(constants::APP_NAME_SETTING),
            license_key: settings.get("NEW_RELIC_LICENSE_KEY"),
            insert_key: settings.get("NEW_RELIC_INSERT_KEY"),
            minimum_level,
            batch_size_limit,
            period,
            https_proxy,
            ..defaults
        }
    }
}

/// Validated sink configuration. Fixed for the lifetime of a sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    endpoint_url: String,
    application_name: String,
    credential: Credential,
    minimum_level: Level,
    batch_size_limit: usize,
    period: Duration,
    max_batches_per_cycle: usize,
    queue_capacity: usize,
    retry_strategy: RetryStrategy,
    request_timeout: Duration,
    https_proxy: Option<String>,
    use_compression: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SinkConfig {
    /// Validates `options`, resolving missing values from the environment.
    pub fn new(options: SinkOptions) -> Result<Self, ConfigError> {
        Self::with_settings(options, &EnvSettings)
    }

    pub fn with_settings(
        options: SinkOptions,
        settings: &dyn SettingsSource,
    ) -> Result<Self, ConfigError> {
        let application_name = non_blank(options.application_name)
            .or_else(|| non_blank(settings.get(constants::APP_NAME_SETTING)))
            .ok_or(ConfigError::MissingApplicationName(
                constants::APP_NAME_SETTING,
            ))?;

        let endpoint_url = options.endpoint_url.trim().to_string();
        if endpoint_url.is_empty() {
            return Err(ConfigError::BlankEndpoint);
        }
        reqwest::Url::parse(&endpoint_url).map_err(|e| ConfigError::InvalidEndpoint {
            url: endpoint_url.clone(),
            reason: e.to_string(),
        })?;

        // License key wins when both are supplied.
        let credential = match (non_blank(options.license_key), non_blank(options.insert_key)) {
            (Some(license_key), _) => Credential::LicenseKey(license_key),
            (None, Some(insert_key)) => Credential::InsertKey(insert_key),
            (None, None) => return Err(ConfigError::MissingCredential),
        };
        if reqwest::header::HeaderValue::from_str(credential.value()).is_err() {
            return Err(ConfigError::InvalidCredential);
        }

        if options.batch_size_limit == 0 {
            return Err(ConfigError::InvalidBatching(
                "batch size limit must be greater than 0".to_string(),
            ));
        }
        if options.max_batches_per_cycle == 0 {
            return Err(ConfigError::InvalidBatching(
                "max batches per cycle must be greater than 0".to_string(),
            ));
        }
        if options.queue_capacity == 0 {
            return Err(ConfigError::InvalidBatching(
                "queue capacity must be greater than 0".to_string(),
            ));
        }
        if options.period.is_zero() {
            return Err(ConfigError::InvalidBatching(
                "period must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            endpoint_url,
            application_name,
            credential,
            minimum_level: options.minimum_level,
            batch_size_limit: options.batch_size_limit,
            period: options.period,
            max_batches_per_cycle: options.max_batches_per_cycle,
            queue_capacity: options.queue_capacity,
            retry_strategy: options.retry_strategy,
            request_timeout: options.request_timeout,
            https_proxy: non_blank(options.https_proxy),
            use_compression: options.use_compression,
        })
    }

    #[must_use]
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    #[must_use]
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    #[must_use]
    pub fn minimum_level(&self) -> Level {
        self.minimum_level
    }

    #[must_use]
    pub fn batch_size_limit(&self) -> usize {
        self.batch_size_limit
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn max_batches_per_cycle(&self) -> usize {
        self.max_batches_per_cycle
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    #[must_use]
    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn https_proxy(&self) -> Option<&str> {
        self.https_proxy.as_deref()
    }

    #[must_use]
    pub fn use_compression(&self) -> bool {
        self.use_compression
    }
}
