//! Per-endpoint observation state and the append-only run history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;

use crate::error::ErrorClass;
use crate::registry::{EndpointKey, RegistryError};
use crate::timestamp::UnixTimestamp;

/// Observation state machine of one endpoint.
///
/// `Untested → Probing → {Paid, Free, Failed}`; every later run starts again
/// from a terminal state through `Probing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointState {
    /// Never probed.
    Untested,
    /// A probe is in flight.
    Probing,
    /// Answered 402 and the paid request went through.
    Paid,
    /// Answered 2xx without payment.
    Free,
    /// The probe or the payment failed.
    Failed,
}

impl EndpointState {
    /// Returns `true` for `Paid`, `Free` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Free | Self::Failed)
    }

    /// Returns `true` if the state machine allows `self → to`.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (Self::Untested, Self::Probing)
            | (Self::Probing, Self::Paid | Self::Free | Self::Failed) => true,
            (from, Self::Probing) => from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Untested => "untested",
            Self::Probing => "probing",
            Self::Paid => "paid",
            Self::Free => "free",
            Self::Failed => "failed",
        })
    }
}

/// One immutable record of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRun {
    /// Endpoint natural key.
    pub endpoint: EndpointKey,
    /// When the probe started.
    pub observed_at: UnixTimestamp,
    /// Wall time of the probe plus any payment round trip.
    pub latency_ms: u64,
    /// Final HTTP status seen, if any response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Terminal state reached.
    pub outcome: EndpointState,
    /// Failure class, or a warning class on a successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    /// Settlement transaction id for paid runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_tx: Option<String>,
    /// Free-form diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ObservationRun {
    /// Returns `true` if the endpoint answered as expected.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, EndpointState::Paid | EndpointState::Free)
    }
}

/// Append-only store of observation runs.
#[async_trait]
pub trait ObservationLog: Send + Sync {
    /// Appends one run.
    async fn append(&self, run: ObservationRun) -> Result<(), RegistryError>;

    /// Returns every run recorded for `endpoint`, oldest first.
    async fn history(&self, endpoint: &EndpointKey) -> Result<Vec<ObservationRun>, RegistryError>;
}

/// In-memory [`ObservationLog`].
#[derive(Debug, Default)]
pub struct MemoryObservationLog {
    runs: RwLock<Vec<ObservationRun>>,
}

impl MemoryObservationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log holding previously persisted runs.
    #[must_use]
    pub fn from_runs(runs: Vec<ObservationRun>) -> Self {
        Self {
            runs: RwLock::new(runs),
        }
    }

    /// Number of stored runs.
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[async_trait]
impl ObservationLog for MemoryObservationLog {
    async fn append(&self, run: ObservationRun) -> Result<(), RegistryError> {
        self.runs.write().await.push(run);
        Ok(())
    }

    async fn history(&self, endpoint: &EndpointKey) -> Result<Vec<ObservationRun>, RegistryError> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|run| &run.endpoint == endpoint)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use EndpointState::{Failed, Free, Paid, Probing, Untested};
        assert!(Untested.can_transition(Probing));
        assert!(!Untested.can_transition(Paid));
        assert!(Probing.can_transition(Free));
        assert!(Failed.can_transition(Probing));
        assert!(!Paid.can_transition(Failed));
        assert!(!Probing.can_transition(Untested));
    }

    #[tokio::test]
    async fn test_history_is_per_endpoint() {
        let log = MemoryObservationLog::new();
        let key = |endpoint: &str| EndpointKey {
            agent_address: "agent".into(),
            endpoint: endpoint.into(),
            method: "GET".into(),
        };
        let runs = [
            ("a", EndpointState::Free),
            ("b", EndpointState::Failed),
            ("a", EndpointState::Paid),
        ];
        for (endpoint, outcome) in runs {
            log.append(ObservationRun {
                endpoint: key(endpoint),
                observed_at: UnixTimestamp::from_secs(1),
                latency_ms: 5,
                http_status: Some(200),
                outcome,
                error_class: None,
                settlement_tx: None,
                detail: None,
            })
            .await
            .unwrap();
        }
        let history = log.history(&key("a")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outcome, EndpointState::Paid);
        assert_eq!(log.len().await, 3);
    }
}
