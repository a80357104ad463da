//! Header value encodings.
//!
//! x402 headers carry JSON, usually base64-encoded. Servers in the wild also
//! send the JSON verbatim, so decoding accepts both.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error decoding a JSON header value.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    /// The value was neither JSON nor base64.
    #[error("header is neither JSON nor base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes were not the expected JSON shape.
    #[error("header JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Standard-alphabet, padded base64 of `bytes`.
#[must_use]
pub fn to_base64(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard base64, ignoring surrounding whitespace.
///
/// # Errors
///
/// Returns [`base64::DecodeError`] on invalid input.
pub fn from_base64(encoded: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded.as_ref().trim_ascii())
}

/// Decodes a header value that carries JSON either verbatim or base64-encoded.
///
/// A value starting with `{` (after whitespace) is parsed as raw JSON.
///
/// # Errors
///
/// Returns [`HeaderDecodeError`] if neither interpretation yields `T`.
pub fn decode_json_header<T: DeserializeOwned>(value: &[u8]) -> Result<T, HeaderDecodeError> {
    let value = value.trim_ascii();
    if value.starts_with(b"{") {
        return Ok(serde_json::from_slice(value)?);
    }
    Ok(serde_json::from_slice(&from_base64(value)?)?)
}

/// Serializes `value` as base64 JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode_json_header<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_vec(value).map(to_base64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_raw_json_header_is_accepted() {
        let value: Value = decode_json_header(br#" {"success":true} "#).unwrap();
        assert_eq!(value, json!({"success": true}));
    }

    #[test]
    fn test_base64_json_header_is_accepted() {
        let encoded = encode_json_header(&json!({"transaction": "abc"})).unwrap();
        assert!(!encoded.starts_with('{'));
        let value: Value = decode_json_header(encoded.as_bytes()).unwrap();
        assert_eq!(value, json!({"transaction": "abc"}));
    }

    #[test]
    fn test_garbage_header_is_a_base64_error() {
        let result: Result<Value, _> = decode_json_header(b"!!not-base64!!");
        assert!(matches!(result, Err(HeaderDecodeError::Base64(_))));
    }

    #[test]
    fn test_base64_ignores_padding_whitespace() {
        assert_eq!(from_base64(format!(" {}\n", to_base64(b"x402"))).unwrap(), b"x402");
    }
}
