//! Paid requests and settlement decoding.

use http::StatusCode;
use reqwest::Client;
use std::time::{Duration, Instant};
use w402::proto::{PaymentPayload, SettlementResult};

#[cfg(feature = "telemetry")]
use tracing::{instrument, warn};

use crate::constants::{DEFAULT_REQUEST_TIMEOUT, X_PAYMENT_HEADER};
use crate::error::{SubmitError, TransportError};
use crate::headers::{decode_payment_response, encode_x_payment, settlement_header};
use crate::request::RequestDescriptor;

/// Why a successful paid response carries no usable settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnconfirmedReason {
    /// Neither settlement header was present.
    MissingHeader,
    /// The header could not be decoded.
    Undecodable(String),
}

/// Settlement outcome of a paid request that returned 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The server reported a successful settlement.
    Confirmed(SettlementResult),
    /// The server did not report settlement; the payment may still land.
    Unconfirmed(UnconfirmedReason),
}

impl Settlement {
    /// Settlement transaction id, when confirmed.
    #[must_use]
    pub fn transaction(&self) -> Option<&str> {
        match self {
            Self::Confirmed(result) if !result.transaction.is_empty() => Some(&result.transaction),
            _ => None,
        }
    }
}

/// A paid request that the server accepted.
#[derive(Debug, Clone)]
pub struct PaidResponse {
    /// Settlement outcome.
    pub settlement: Settlement,
    /// Response body.
    pub body: Vec<u8>,
    /// Time from send to fully read body.
    pub latency: Duration,
}

/// Re-issues requests with an `X-PAYMENT` header, exactly once.
#[derive(Debug, Clone)]
pub struct PaymentSubmitter {
    client: Client,
    timeout: Duration,
}

impl PaymentSubmitter {
    /// Creates a submitter with the default request timeout.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends `request` with `payment` attached and decodes the settlement.
    ///
    /// A missing or undecodable settlement header on a 200 response yields
    /// [`Settlement::Unconfirmed`] rather than an error.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Rejected`] for any status other than 200
    /// - [`SubmitError::SettlementFailed`] when the settlement reports `success: false`
    /// - [`SubmitError::Transport`] on timeout or connection failure
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "w402.submit", skip_all, err, fields(method = %request.method, url = %request.url))
    )]
    pub async fn submit(
        &self,
        request: &RequestDescriptor,
        payment: &PaymentPayload,
    ) -> Result<PaidResponse, SubmitError> {
        let header = encode_x_payment(payment)?;
        let started = Instant::now();
        let response = request
            .build(&self.client)
            .header(X_PAYMENT_HEADER, header)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e))?;

        let status = response.status();
        let settlement = decode_settlement(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e))?
            .to_vec();
        let latency = started.elapsed();

        if status != StatusCode::OK {
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        match &settlement {
            Settlement::Confirmed(result) if !result.success => {
                return Err(SubmitError::SettlementFailed {
                    reason: result
                        .error_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_owned()),
                });
            }
            Settlement::Unconfirmed(_reason) => {
                #[cfg(feature = "telemetry")]
                warn!(reason = ?_reason, "Paid request succeeded without settlement confirmation");
            }
            Settlement::Confirmed(_) => {}
        }

        Ok(PaidResponse {
            settlement,
            body,
            latency,
        })
    }
}

fn decode_settlement(headers: &http::HeaderMap) -> Settlement {
    let Some(value) = settlement_header(headers) else {
        return Settlement::Unconfirmed(UnconfirmedReason::MissingHeader);
    };
    match decode_payment_response(value.as_bytes()) {
        Ok(result) => Settlement::Confirmed(result),
        Err(e) => Settlement::Unconfirmed(UnconfirmedReason::Undecodable(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAYMENT_RESPONSE_HEADER;
    use crate::headers::{decode_x_payment, encode_payment_response};
    use url::Url;
    use w402::ErrorClass;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settled(success: bool) -> SettlementResult {
        SettlementResult {
            success,
            transaction: "sig".to_owned(),
            network: "solana".to_owned(),
            payer: "payer".to_owned(),
            error_reason: (!success).then(|| "blockhash_expired".to_owned()),
        }
    }

    async fn submit_against(response: ResponseTemplate) -> (MockServer, Result<PaidResponse, SubmitError>) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .and(header_exists(X_PAYMENT_HEADER))
            .respond_with(response)
            .expect(1)
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/paid", server.uri())).unwrap();
        let result = PaymentSubmitter::new(Client::new())
            .submit(
                &RequestDescriptor::for_endpoint("GET", url),
                &PaymentPayload::exact("solana", "AQID"),
            )
            .await;
        (server, result)
    }

    #[tokio::test]
    async fn test_sends_decodable_payment_header_once() {
        let header = encode_payment_response(&settled(true)).unwrap();
        let (server, result) = submit_against(
            ResponseTemplate::new(200).insert_header("X-PAYMENT-RESPONSE", header.to_str().unwrap()),
        )
        .await;

        let paid = result.unwrap();
        assert_eq!(paid.settlement, Settlement::Confirmed(settled(true)));
        assert_eq!(paid.settlement.transaction(), Some("sig"));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sent = requests[0].headers.get(X_PAYMENT_HEADER).unwrap();
        let payload = decode_x_payment(sent.as_bytes()).unwrap();
        assert_eq!(payload, PaymentPayload::exact("solana", "AQID"));
    }

    #[tokio::test]
    async fn test_raw_json_fallback_header_is_confirmed() {
        let raw = serde_json::to_string(&settled(true)).unwrap();
        let (_server, result) =
            submit_against(ResponseTemplate::new(200).insert_header(PAYMENT_RESPONSE_HEADER, raw.as_str())).await;
        assert!(matches!(result.unwrap().settlement, Settlement::Confirmed(_)));
    }

    #[tokio::test]
    async fn test_missing_header_is_unconfirmed_not_failure() {
        let (_server, result) = submit_against(ResponseTemplate::new(200).set_body_string("ok")).await;
        let paid = result.unwrap();
        assert_eq!(paid.settlement, Settlement::Unconfirmed(UnconfirmedReason::MissingHeader));
        assert_eq!(paid.body, b"ok");
    }

    #[tokio::test]
    async fn test_garbage_header_is_unconfirmed() {
        let (_server, result) =
            submit_against(ResponseTemplate::new(200).insert_header("X-PAYMENT-RESPONSE", "%%%")).await;
        assert!(matches!(
            result.unwrap().settlement,
            Settlement::Unconfirmed(UnconfirmedReason::Undecodable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_settlement_is_rejection() {
        let header = encode_payment_response(&settled(false)).unwrap();
        let (_server, result) = submit_against(
            ResponseTemplate::new(200).insert_header("X-PAYMENT-RESPONSE", header.to_str().unwrap()),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(&err, SubmitError::SettlementFailed { reason } if reason == "blockhash_expired"));
        assert_eq!(err.class(), ErrorClass::PaymentRejected);
    }

    #[tokio::test]
    async fn test_non_200_is_rejection_with_body() {
        let (_server, result) =
            submit_against(ResponseTemplate::new(402).set_body_string(r#"{"error":"invalid_payment"}"#)).await;
        match result.unwrap_err() {
            SubmitError::Rejected { status, body } => {
                assert_eq!(status, 402);
                assert!(body.contains("invalid_payment"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
