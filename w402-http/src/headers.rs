//! Encoding and decoding of the x402 payment headers.
//!
//! `X-PAYMENT` is always sent as base64 JSON. Settlement headers are
//! accepted either base64-encoded or as raw JSON.

use http::HeaderMap;
use http::header::HeaderValue;
use w402::encoding::{decode_json_header, encode_json_header};
use w402::proto::{PaymentPayload, SettlementResult};

use crate::constants::{PAYMENT_RESPONSE_HEADER, X_PAYMENT_RESPONSE_HEADER};
use crate::error::HttpError;

/// Encodes a [`PaymentPayload`] as an `X-PAYMENT` header value.
///
/// # Errors
///
/// Returns [`HttpError`] if serialization fails.
pub fn encode_x_payment(payload: &PaymentPayload) -> Result<HeaderValue, HttpError> {
    let encoded = encode_json_header(payload)?;
    Ok(HeaderValue::from_str(&encoded)?)
}

/// Decodes an `X-PAYMENT` header value.
///
/// # Errors
///
/// Returns [`HttpError::Decode`] on malformed input.
pub fn decode_x_payment(value: &[u8]) -> Result<PaymentPayload, HttpError> {
    Ok(decode_json_header(value)?)
}

/// Encodes a [`SettlementResult`] as an `X-PAYMENT-RESPONSE` header value.
///
/// # Errors
///
/// Returns [`HttpError`] if serialization fails.
pub fn encode_payment_response(settlement: &SettlementResult) -> Result<HeaderValue, HttpError> {
    let encoded = encode_json_header(settlement)?;
    Ok(HeaderValue::from_str(&encoded)?)
}

/// Decodes a settlement header value.
///
/// # Errors
///
/// Returns [`HttpError::Decode`] on malformed input.
pub fn decode_payment_response(value: &[u8]) -> Result<SettlementResult, HttpError> {
    Ok(decode_json_header(value)?)
}

/// Returns the settlement header, preferring `X-PAYMENT-RESPONSE`.
#[must_use]
pub fn settlement_header(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers
        .get(X_PAYMENT_RESPONSE_HEADER)
        .or_else(|| headers.get(PAYMENT_RESPONSE_HEADER))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settlement() -> SettlementResult {
        SettlementResult {
            success: true,
            transaction: "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW".to_owned(),
            network: "solana".to_owned(),
            payer: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_owned(),
            error_reason: None,
        }
    }

    #[test]
    fn test_settlement_round_trips_field_for_field() {
        let original = settlement();
        let header = encode_payment_response(&original).unwrap();
        let decoded = decode_payment_response(header.as_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_settlement_accepts_raw_json() {
        let raw = br#"{"success":false,"transaction":"","network":"solana","payer":"x","errorReason":"insufficient_funds"}"#;
        let decoded = decode_payment_response(raw).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error_reason.as_deref(), Some("insufficient_funds"));
    }

    #[test]
    fn test_x_payment_is_base64_json() {
        let payload = PaymentPayload::exact("solana", "AQID");
        let header = encode_x_payment(&payload).unwrap();
        assert_ne!(header.as_bytes().first(), Some(&b'{'));
        assert_eq!(decode_x_payment(header.as_bytes()).unwrap(), payload);
    }

    #[test]
    fn test_falls_back_to_payment_response() {
        let mut headers = HeaderMap::new();
        assert!(settlement_header(&headers).is_none());
        headers.insert(PAYMENT_RESPONSE_HEADER, HeaderValue::from_static("b"));
        assert_eq!(settlement_header(&headers).unwrap().to_str().unwrap(), "b");
        headers.insert(X_PAYMENT_RESPONSE_HEADER, HeaderValue::from_static("a"));
        assert_eq!(settlement_header(&headers).unwrap().to_str().unwrap(), "a");
    }
}
