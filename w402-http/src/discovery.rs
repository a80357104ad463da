//! Discovery of priced endpoints on a target host.
//!
//! [`EndpointDiscoverer`] walks the well-known candidate paths of a
//! [`DiscoveryTarget`] in priority order and returns the endpoints of the
//! first document that yields any. Discovery never fails: every problem
//! with a candidate just moves on to the next one.

use http::StatusCode;
use reqwest::Client;
use std::time::Duration;
use url::Url;
use w402::discovery::{DiscoveredEndpoint, DiscoveryResponse, DiscoveryTarget, PriceNormalization};

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::constants::DEFAULT_DISCOVERY_TIMEOUT;
use crate::error::{DiscoveryError, TransportError};

/// HTTP client for discovery documents.
#[derive(Debug, Clone)]
pub struct EndpointDiscoverer {
    client: Client,
    timeout: Duration,
    policy: PriceNormalization,
}

impl EndpointDiscoverer {
    /// Creates a discoverer with the default 5 second timeout and price policy.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            policy: PriceNormalization::default(),
        }
    }

    /// Sets the per-candidate timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the price normalization policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: PriceNormalization) -> Self {
        self.policy = policy;
        self
    }

    /// Discovers the endpoints `target` advertises.
    ///
    /// The result is empty when no candidate yields a valid endpoint.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "w402.discover", skip_all, fields(agent = %target.agent_address, base = %target.base_url))
    )]
    pub async fn discover(&self, target: &DiscoveryTarget) -> Vec<DiscoveredEndpoint> {
        for candidate in target.candidate_urls() {
            match self.try_candidate(&candidate, &target.base_url).await {
                Ok(endpoints) => {
                    #[cfg(feature = "telemetry")]
                    debug!(url = %candidate, count = endpoints.len(), "Discovery document accepted");
                    return endpoints;
                }
                Err(reason) => {
                    #[cfg(not(feature = "telemetry"))]
                    let _ = reason;
                    #[cfg(feature = "telemetry")]
                    match &reason {
                        DiscoveryError::Timeout(e) => {
                            debug!(url = %candidate, class = %e.class(), "Discovery candidate timed out");
                        }
                        other => debug!(url = %candidate, reason = %other, "Skipping discovery candidate"),
                    }
                }
            }
        }
        Vec::new()
    }

    async fn try_candidate(
        &self,
        url: &Url,
        base_url: &Url,
    ) -> Result<Vec<DiscoveredEndpoint>, DiscoveryError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        if response.status() != StatusCode::OK {
            return Err(DiscoveryError::Status(response.status()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        let document: DiscoveryResponse = serde_json::from_slice(&body)?;
        let endpoints = document.endpoints(base_url, &self.policy);
        if endpoints.is_empty() {
            return Err(DiscoveryError::Empty);
        }
        Ok(endpoints)
    }
}
