// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport for the New Relic Logs API.
//!
//! The client supports:
//! - **Compression**: gzip request bodies (`Content-Encoding: gzip`)
//! - **Proxy support**: HTTPS proxy taken from the sink configuration
//! - **Timeouts**: per-attempt request timeout
//! - **Connection pooling**: idle timeout and TCP keep-alive
//!
//! Each call to [`HttpDeliveryClient::deliver`] is exactly one POST; retries
//! are layered on top by [`crate::RetryingDelivery`].

use async_trait::async_trait;
use core::time::Duration;
use flate2::{write::GzEncoder, Compression};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error};

use crate::batch::Batch;
use crate::config::SinkConfig;
use crate::delivery::DeliveryClient;
use crate::error::{ConfigError, DeliveryError, FormatError};
use crate::formatter::{BatchFormatter, NewRelicFormatter};

/// Creates a configured HTTP client.
///
/// If the proxy configuration is invalid, logs an error and falls back to a
/// direct connection so the sink keeps operating.
#[must_use]
pub fn get_client(config: &SinkConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "NR_LOGS | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "NR_LOGS | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &SinkConfig, allow_proxy: bool) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = config.https_proxy() {
            let proxy = reqwest::Proxy::https(https_uri)?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

/// Maps a response status onto the delivery taxonomy. `None` means success.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<DeliveryError> {
    if status.is_success() {
        return None;
    }
    let code = status.as_u16();
    let message = format!("New Relic Logs API responded with {status}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Some(DeliveryError::transient(Some(code), message))
    } else {
        Some(DeliveryError::permanent(Some(code), message))
    }
}

/// Maps a transport failure onto the delivery taxonomy. Requests that could
/// not be built fail the same way on every attempt.
#[must_use]
pub fn classify_send_error(e: &reqwest::Error) -> DeliveryError {
    let status = e.status().map(|s| s.as_u16());
    if e.is_builder() {
        DeliveryError::permanent(status, e.to_string())
    } else {
        DeliveryError::transient(status, e.to_string())
    }
}

/// One POST per batch to the configured endpoint.
#[derive(Clone)]
pub struct HttpDeliveryClient {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    formatter: Arc<dyn BatchFormatter>,
    use_compression: bool,
}

impl HttpDeliveryClient {
    pub fn new(config: &SinkConfig) -> Result<Self, ConfigError> {
        let formatter = Arc::new(NewRelicFormatter::new(config.application_name()));
        Self::with_formatter(config, formatter)
    }

    pub fn with_formatter(
        config: &SinkConfig,
        formatter: Arc<dyn BatchFormatter>,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        let credential = config.credential();
        let key =
            HeaderValue::from_str(credential.value()).map_err(|_| ConfigError::InvalidCredential)?;
        headers.insert(credential.header_name(), key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.use_compression() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        Ok(Self {
            client: get_client(config),
            endpoint: config.endpoint_url().to_string(),
            headers,
            formatter,
            use_compression: config.use_compression(),
        })
    }

    fn body(&self, batch: &Batch) -> Result<Vec<u8>, FormatError> {
        let payload = self.formatter.format(batch)?;
        if !self.use_compression {
            return Ok(payload);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        Ok(encoder.finish()?)
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = self.body(batch)?;
        debug!(
            "NR_LOGS | Sending {} events ({} bytes) to {}",
            batch.len(),
            body.len(),
            self.endpoint
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = resp.status();
        match classify_status(status) {
            None => Ok(()),
            Some(err) => {
                if status == StatusCode::FORBIDDEN {
                    error!(
                        "NR_LOGS | Request was denied by New Relic: Access denied. Please verify that your license or insert key is valid."
                    );
                }
                // Only read the body when reporting a failure.
                let text = resp.text().await.unwrap_or_default();
                debug!("NR_LOGS | {}: response body {:?}", status, text);
                Err(err)
            }
        }
    }
}
