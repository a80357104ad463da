//! HTTP-specific constants for the x402 handshake.

use std::time::Duration;

/// Request header carrying the payment payload (client to server).
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the settlement result.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Fallback settlement header used by newer servers.
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Timeout applied to each discovery candidate.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout applied to unpaid probes and paid requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
