//! Error types for the HTTP transport layer.

use http::StatusCode;
use w402::{ErrorClass, ObserveError};
use w402::encoding::HeaderDecodeError;

/// Errors that can occur during payment header encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The header was neither base64 JSON nor raw JSON of the expected shape.
    #[error(transparent)]
    Decode(#[from] HeaderDecodeError),

    /// The encoded value is not a legal header value.
    #[error("invalid header value: {0}")]
    InvalidValue(#[from] http::header::InvalidHeaderValue),
}

/// Transport-level failure of a single request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No response within the request timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL.
        url: String,
    },
    /// Connection, TLS or body read failure.
    #[error("request to {url} failed: {source}")]
    Network {
        /// Target URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &url::Url, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Recorded error class.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Network { .. } => ErrorClass::Network,
        }
    }
}

/// Why a discovery candidate was skipped.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The candidate did not answer within the discovery timeout.
    #[error(transparent)]
    Timeout(ObserveError),
    /// Connection, TLS or body read failure.
    #[error(transparent)]
    Transport(TransportError),
    /// Anything other than 200.
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// The body is not a discovery document.
    #[error("malformed discovery document: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The document listed no valid endpoint.
    #[error("no valid endpoints")]
    Empty,
}

impl From<TransportError> for DiscoveryError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { url } => Self::Timeout(ObserveError::DiscoveryTimeout { url }),
            other => Self::Transport(other),
        }
    }
}

/// Failure of a paid request.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The payment header could not be encoded.
    #[error("failed to encode payment header: {0}")]
    Header(#[from] HttpError),
    /// The paid request never got a response.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered the paid request with a non-200 status.
    #[error("payment rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The server answered 200 but reported a failed settlement.
    #[error("settlement failed: {reason}")]
    SettlementFailed {
        /// Server-supplied reason, if any.
        reason: String,
    },
}

impl SubmitError {
    /// Recorded error class.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Header(_) => ErrorClass::ConstructionError,
            Self::Transport(e) => e.class(),
            Self::Rejected { .. } | Self::SettlementFailed { .. } => ErrorClass::PaymentRejected,
        }
    }
}
