// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building a [`crate::SinkConfig`].
///
/// These are always surfaced synchronously, before a sink exists.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Must supply an application name either as an option or through the {0} setting")]
    MissingApplicationName(&'static str),

    #[error("New Relic Logs API endpoint URL must be supplied")]
    BlankEndpoint,

    #[error("Invalid New Relic Logs API endpoint URL '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Either a license key or an insert key must be supplied")]
    MissingCredential,

    #[error("Credential contains characters that cannot be sent in an HTTP header")]
    InvalidCredential,

    #[error("Invalid batching configuration: {0}")]
    InvalidBatching(String),

    #[error("A sink must be created from within a tokio runtime")]
    MissingRuntime,
}

/// Outcome of a single failed delivery attempt.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Expected to succeed on retry: timeouts, connection failures, 5xx.
    #[error("transient delivery failure (status {status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Retrying cannot fix it: bad credential, malformed payload.
    #[error("permanent delivery failure (status {status:?}): {message}")]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl DeliveryError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }
}

/// Failure to turn a batch into a wire payload.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to compress batch: {0}")]
    Compress(#[from] std::io::Error),
}

impl From<FormatError> for DeliveryError {
    fn from(err: FormatError) -> Self {
        DeliveryError::permanent(None, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::MissingApplicationName("NEW_RELIC_APP_NAME");
        assert_eq!(
            error.to_string(),
            "Must supply an application name either as an option or through the NEW_RELIC_APP_NAME setting"
        );
        assert_eq!(
            ConfigError::MissingCredential.to_string(),
            "Either a license key or an insert key must be supplied"
        );
    }

    #[test]
    fn test_delivery_error_classification() {
        let transient = DeliveryError::transient(Some(503), "unavailable");
        let permanent = DeliveryError::permanent(Some(403), "forbidden");

        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
        assert_eq!(transient.status(), Some(503));
        assert_eq!(permanent.status(), Some(403));
    }

    #[test]
    fn test_format_error_is_permanent() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error: DeliveryError = FormatError::from(io).into();
        assert!(!error.is_transient());
        assert!(error.to_string().contains("disk on fire"));
    }
}
