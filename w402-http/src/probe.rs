//! Unpaid requests.

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::time::{Duration, Instant};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::constants::{DEFAULT_REQUEST_TIMEOUT, HTTP_STATUS_PAYMENT_REQUIRED};
use crate::error::TransportError;
use crate::request::RequestDescriptor;

/// Response to an unpaid request.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Vec<u8>,
    /// Time from send to fully read body.
    pub latency: Duration,
}

impl ProbeResponse {
    /// Returns `true` for `402 Payment Required`.
    #[must_use]
    pub fn is_payment_required(&self) -> bool {
        self.status.as_u16() == HTTP_STATUS_PAYMENT_REQUIRED
    }
}

/// Issues unpaid requests with a per-request timeout.
#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
    timeout: Duration,
}

impl Prober {
    /// Creates a prober with the default request timeout.
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

    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `request` without payment and reads the whole response.
    ///
    /// Any status is a successful probe; only transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on timeout or connection failure.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "w402.probe", skip_all, err, fields(method = %request.method, url = %request.url))
    )]
    pub async fn probe(&self, request: &RequestDescriptor) -> Result<ProbeResponse, TransportError> {
        let started = Instant::now();
        let response = request
            .build(&self.client)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e))?;
        Ok(ProbeResponse {
            status,
            headers,
            body: body.to_vec(),
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use w402::ErrorClass;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_returns_402_body_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(ResponseTemplate::new(402).set_body_string(r#"{"accepts":[]}"#))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/paid", server.uri())).unwrap();
        let response = Prober::new(Client::new())
            .probe(&RequestDescriptor::for_endpoint("GET", url))
            .await
            .unwrap();

        assert!(response.is_payment_required());
        assert_eq!(response.body, br#"{"accepts":[]}"#);
    }

    #[tokio::test]
    async fn test_post_sends_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run"))
            .and(body_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/run", server.uri())).unwrap();
        let response = Prober::new(Client::new())
            .probe(&RequestDescriptor::for_endpoint("POST", url))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = Prober::new(Client::new())
            .with_timeout(Duration::from_millis(50))
            .probe(&RequestDescriptor::for_endpoint("GET", url))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Timeout);
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = Prober::new(Client::new())
            .with_timeout(Duration::from_secs(2))
            .probe(&RequestDescriptor::for_endpoint("GET", url))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Network);
    }
}
