//! Wire format types for the x402 exchange as seen by a paying client.
//!
//! Only the subset of the protocol that an observer needs is modelled: the
//! `402` response body, the `X-PAYMENT` payload and the settlement result
//! returned in `X-PAYMENT-RESPONSE`.
//!
//! All types serialize to JSON using camelCase field names.

use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{DisplayFromStr, PickFirst, VecSkipError, serde_as};

/// The only payment scheme supported: an exact-amount token transfer.
pub const EXACT_SCHEME: &str = "exact";

/// The protocol version this client speaks.
pub const X402_VERSION: u8 = 1;

fn x402_version<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    match u8::deserialize(deserializer)? {
        X402_VERSION => Ok(X402_VERSION),
        other => Err(serde::de::Error::custom(format!(
            "unsupported x402 version {other}"
        ))),
    }
}

/// HTTP 402 Payment Required response body.
///
/// Offers that do not deserialize are skipped rather than failing the whole
/// body.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version advertised by the server, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x402_version: Option<u8>,
    /// List of acceptable payment offers.
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    pub accepts: Vec<PaymentRequirementOffer>,
    /// Optional error message from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One payment offer inside a 402 body, as sent by the server.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementOffer {
    /// The payment scheme (e.g., "exact").
    pub scheme: String,
    /// The network identifier (e.g., "solana" or a CAIP-2 id).
    pub network: String,
    /// The token mint or contract address.
    pub asset: String,
    /// The recipient address.
    pub pay_to: String,
    /// Amount in the asset's smallest unit; a decimal string on the wire,
    /// though a bare integer is accepted.
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(alias = "amount")]
    pub max_amount_required: u64,
    /// The resource URL being paid for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Human-readable description of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Maximum time in seconds for payment validity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout_seconds: Option<u64>,
    /// Scheme-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirementOffer {
    /// Returns the fee payer hint from `extra.feePayer`, if present and non-empty.
    #[must_use]
    pub fn fee_payer(&self) -> Option<&str> {
        self.extra
            .as_ref()?
            .get("feePayer")?
            .as_str()
            .filter(|s| !s.trim().is_empty())
    }
}

/// Scheme-specific body of an exact payment: the signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// Base64-encoded serialized transaction.
    pub transaction: String,
}

/// A signed payment authorization, sent in the `X-PAYMENT` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version, always [`X402_VERSION`].
    #[serde(deserialize_with = "x402_version")]
    pub x402_version: u8,
    /// The payment scheme.
    pub scheme: String,
    /// The network identifier copied from the selected offer.
    pub network: String,
    /// The transport blob.
    pub payload: ExactPayload,
}

impl PaymentPayload {
    /// Creates an exact-scheme payload for `network` carrying `transaction`.
    #[must_use]
    pub fn exact(network: impl Into<String>, transaction: impl Into<String>) -> Self {
        Self {
            x402_version: X402_VERSION,
            scheme: EXACT_SCHEME.to_owned(),
            network: network.into(),
            payload: ExactPayload {
                transaction: transaction.into(),
            },
        }
    }
}

/// Settlement confirmation returned in the `X-PAYMENT-RESPONSE` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Whether the counterpart settled the payment.
    pub success: bool,
    /// On-chain transaction identifier.
    #[serde(default)]
    pub transaction: String,
    /// Network the payment settled on.
    #[serde(default)]
    pub network: String,
    /// Address of the paying party.
    #[serde(default)]
    pub payer: String,
    /// Machine-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}
