//! Error taxonomy for discovery, payment and observation.
//!
//! [`ObserveError`] carries the failures the payment pipeline can surface to
//! the scheduler. [`ErrorClass`] is its fieldless projection, recorded on
//! observation runs and used to aggregate failure reasons in reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures surfaced by the discovery and payment layers.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// A discovery candidate did not answer in time.
    #[error("discovery request to {url} timed out")]
    DiscoveryTimeout {
        /// The candidate URL.
        url: String,
    },
    /// The 402 body contained no offer this client can pay.
    #[error("no compatible payment offer: {0}")]
    NoCompatibleOffer(String),
    /// The paying account holds less than the required amount.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount required, in smallest units.
        required: u64,
        /// Amount available, in smallest units.
        available: u64,
    },
    /// Building, signing or encoding the payment failed.
    #[error("payment construction failed: {0}")]
    ConstructionError(String),
    /// The counterpart refused the paid request.
    #[error("payment rejected with status {status}: {body}")]
    PaymentRejected {
        /// HTTP status of the paid request.
        status: u16,
        /// Response body kept for diagnosis.
        body: String,
    },
    /// The paid request succeeded but settlement was not confirmed.
    #[error("payment sent, settlement unconfirmed: {0}")]
    SettlementUnconfirmed(String),
}

impl ObserveError {
    /// Returns the fieldless class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DiscoveryTimeout { .. } => ErrorClass::DiscoveryTimeout,
            Self::NoCompatibleOffer(_) => ErrorClass::NoCompatibleOffer,
            Self::InsufficientFunds { .. } => ErrorClass::InsufficientFunds,
            Self::ConstructionError(_) => ErrorClass::ConstructionError,
            Self::PaymentRejected { .. } => ErrorClass::PaymentRejected,
            Self::SettlementUnconfirmed(_) => ErrorClass::SettlementUnconfirmed,
        }
    }

    /// Returns `true` if the error should not mark an attempt as failed.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        matches!(self, Self::SettlementUnconfirmed(_))
    }
}

/// Classification of an observation outcome, used for records and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A discovery candidate timed out.
    DiscoveryTimeout,
    /// No payable offer in the 402 body.
    NoCompatibleOffer,
    /// Balance below the required amount.
    InsufficientFunds,
    /// Building or signing the payment failed.
    ConstructionError,
    /// The paid request was refused.
    PaymentRejected,
    /// Paid, but settlement was not confirmed.
    SettlementUnconfirmed,
    /// The unpaid probe timed out.
    Timeout,
    /// Transport-level failure (DNS, TLS, connection reset).
    Network,
    /// The unpaid probe returned a non-2xx, non-402 status.
    HttpStatus,
}

impl ErrorClass {
    /// Stable snake-case name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoveryTimeout => "discovery_timeout",
            Self::NoCompatibleOffer => "no_compatible_offer",
            Self::InsufficientFunds => "insufficient_funds",
            Self::ConstructionError => "construction_error",
            Self::PaymentRejected => "payment_rejected",
            Self::SettlementUnconfirmed => "settlement_unconfirmed",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::HttpStatus => "http_status",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
