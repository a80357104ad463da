//! Agent and endpoint registry.
//!
//! The registry is an external collaborator reached through the
//! [`EndpointRegistry`] trait. [`MemoryRegistry`] is the in-process
//! implementation; durable stores wrap it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::AddAssign;
use tokio::sync::RwLock;
use url::Url;

use crate::discovery::{DiscoveredEndpoint, DiscoveryTarget};
use crate::timestamp::UnixTimestamp;

/// Errors raised by registry and observation-log implementations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No agent is registered under this address.
    #[error("unknown agent {0}")]
    UnknownAgent(String),
    /// Agent status may only move forward.
    #[error("agent {address} cannot move from {from} back to {to}")]
    BackwardTransition {
        /// Agent address.
        address: String,
        /// Current status.
        from: AgentStatus,
        /// Requested status.
        to: AgentStatus,
    },
    /// The backing storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Lifecycle of a discovered agent. Ordered: transitions only go forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Seen, nobody has claimed it.
    Discovered,
    /// An owner has claimed it.
    Claimed,
    /// The owner claim has been verified.
    Verified,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::Claimed => "claimed",
            Self::Verified => "verified",
        })
    }
}

/// Where and when an agent was first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryMetadata {
    /// What produced the sighting (e.g., `"config"`, `"directory"`).
    pub source: String,
    /// First sighting.
    pub first_seen: UnixTimestamp,
    /// Chain or environment tag (e.g., `"solana"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Service base URL the agent resolves to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,
}

/// An agent known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredAgent {
    /// Agent address.
    pub address: String,
    /// Lifecycle status.
    pub status: AgentStatus,
    /// Discovery metadata.
    pub metadata: DiscoveryMetadata,
    /// Owner claim, once claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl DiscoveredAgent {
    /// Creates a freshly discovered agent.
    #[must_use]
    pub const fn new(address: String, metadata: DiscoveryMetadata) -> Self {
        Self {
            address,
            status: AgentStatus::Discovered,
            metadata,
            owner: None,
        }
    }

    /// Returns the discovery target for this agent, if it has a base URL.
    #[must_use]
    pub fn target(&self) -> Option<DiscoveryTarget> {
        self.metadata
            .base_url
            .clone()
            .map(|base_url| DiscoveryTarget {
                agent_address: self.address.clone(),
                base_url,
            })
    }

    /// Moves the agent to `to`. Returns `false` when already there.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::BackwardTransition`] if `to` precedes the current status.
    pub fn advance(&mut self, to: AgentStatus) -> Result<bool, RegistryError> {
        if to < self.status {
            return Err(RegistryError::BackwardTransition {
                address: self.address.clone(),
                from: self.status,
                to,
            });
        }
        let changed = to != self.status;
        self.status = to;
        Ok(changed)
    }
}

/// Natural key of an observed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointKey {
    /// Agent address.
    pub agent_address: String,
    /// Endpoint URL.
    pub endpoint: String,
    /// Uppercased HTTP method.
    pub method: String,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.method, self.endpoint, self.agent_address)
    }
}

/// A registered, priced endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedEndpoint {
    /// Owning agent.
    pub agent_address: String,
    /// Service base URL.
    pub base_url: Url,
    /// Endpoint URL.
    pub endpoint: Url,
    /// Uppercased HTTP method.
    pub method: String,
    /// Price in quote-currency units.
    pub price: Decimal,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Registration time.
    pub created_at: UnixTimestamp,
}

impl ObservedEndpoint {
    /// Builds a registry record from a discovery hit.
    #[must_use]
    pub fn from_discovered(
        target: &DiscoveryTarget,
        endpoint: DiscoveredEndpoint,
        created_at: UnixTimestamp,
    ) -> Self {
        Self {
            agent_address: target.agent_address.clone(),
            base_url: target.base_url.clone(),
            endpoint: endpoint.url,
            method: endpoint.method,
            price: endpoint.price,
            description: endpoint.description,
            category: endpoint.category,
            created_at,
        }
    }

    /// Returns the natural key.
    #[must_use]
    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            agent_address: self.agent_address.clone(),
            endpoint: self.endpoint.to_string(),
            method: self.method.to_ascii_uppercase(),
        }
    }
}

/// Outcome of a registration batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Newly stored endpoints.
    pub imported: usize,
    /// Endpoints whose natural key already existed.
    pub skipped: usize,
}

impl AddAssign for ImportSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.imported += rhs.imported;
        self.skipped += rhs.skipped;
    }
}

/// Registration outcome for a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    /// Stored for the first time.
    Imported,
    /// Already present; nothing written.
    Skipped,
}

/// Persistence for agents and endpoints.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Registers endpoints, skipping any whose natural key already exists.
    ///
    /// Returns the per-endpoint outcome in input order.
    async fn register_endpoints(
        &self,
        endpoints: Vec<ObservedEndpoint>,
    ) -> Result<Vec<Registration>, RegistryError>;

    /// Lists endpoints, optionally restricted to one agent.
    async fn list_endpoints(
        &self,
        agent_address: Option<&str>,
    ) -> Result<Vec<ObservedEndpoint>, RegistryError>;

    /// Lists all known agents.
    async fn list_agents(&self) -> Result<Vec<DiscoveredAgent>, RegistryError>;

    /// Records a sighting. Returns `true` if the agent was new.
    async fn upsert_agent(&self, agent: DiscoveredAgent) -> Result<bool, RegistryError>;

    /// Moves an agent's status forward, optionally recording the owner.
    async fn advance_agent_status(
        &self,
        address: &str,
        status: AgentStatus,
        owner: Option<String>,
    ) -> Result<DiscoveredAgent, RegistryError>;
}

/// Registers `endpoints` and folds the outcomes into an [`ImportSummary`].
///
/// # Errors
///
/// Propagates the registry's [`RegistryError`].
pub async fn import_endpoints<R: EndpointRegistry + ?Sized>(
    registry: &R,
    endpoints: Vec<ObservedEndpoint>,
) -> Result<ImportSummary, RegistryError> {
    let outcomes = registry.register_endpoints(endpoints).await?;
    Ok(summarize(&outcomes))
}

/// Counts imported and skipped outcomes.
#[must_use]
pub fn summarize(outcomes: &[Registration]) -> ImportSummary {
    outcomes
        .iter()
        .fold(ImportSummary::default(), |mut summary, outcome| {
            match outcome {
                Registration::Imported => summary.imported += 1,
                Registration::Skipped => summary.skipped += 1,
            }
            summary
        })
}

/// Serializable image of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Agents by address.
    pub agents: BTreeMap<String, DiscoveredAgent>,
    /// Endpoints in registration order.
    pub endpoints: Vec<ObservedEndpoint>,
}

#[derive(Debug, Default)]
struct RegistryState {
    snapshot: RegistrySnapshot,
    keys: HashSet<EndpointKey>,
}

/// In-memory [`EndpointRegistry`].
///
/// Deduplication happens under the write lock, so concurrent registrations
/// of the same key store it exactly once.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a registry from a snapshot, dropping duplicate keys.
    #[must_use]
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut keys = HashSet::with_capacity(snapshot.endpoints.len());
        let endpoints = snapshot
            .endpoints
            .into_iter()
            .filter(|e| keys.insert(e.key()))
            .collect();
        Self {
            state: RwLock::new(RegistryState {
                snapshot: RegistrySnapshot {
                    agents: snapshot.agents,
                    endpoints,
                },
                keys,
            }),
        }
    }

    /// Returns a copy of the current contents.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.state.read().await.snapshot.clone()
    }

    /// Replaces the contents with `snapshot`, dropping duplicate keys.
    pub async fn restore(&self, snapshot: RegistrySnapshot) {
        let Self { state } = Self::from_snapshot(snapshot);
        *self.state.write().await = state.into_inner();
    }
}

#[async_trait]
impl EndpointRegistry for MemoryRegistry {
    async fn register_endpoints(
        &self,
        endpoints: Vec<ObservedEndpoint>,
    ) -> Result<Vec<Registration>, RegistryError> {
        let mut state = self.state.write().await;
        let mut outcomes = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if state.keys.insert(endpoint.key()) {
                state.snapshot.endpoints.push(endpoint);
                outcomes.push(Registration::Imported);
            } else {
                outcomes.push(Registration::Skipped);
            }
        }
        Ok(outcomes)
    }

    async fn list_endpoints(
        &self,
        agent_address: Option<&str>,
    ) -> Result<Vec<ObservedEndpoint>, RegistryError> {
        let state = self.state.read().await;
        Ok(state
            .snapshot
            .endpoints
            .iter()
            .filter(|e| agent_address.is_none_or(|a| e.agent_address == a))
            .cloned()
            .collect())
    }

    async fn list_agents(&self) -> Result<Vec<DiscoveredAgent>, RegistryError> {
        let state = self.state.read().await;
        Ok(state.snapshot.agents.values().cloned().collect())
    }

    async fn upsert_agent(&self, agent: DiscoveredAgent) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.snapshot.agents.get_mut(&agent.address) {
            if existing.metadata.base_url.is_none() {
                existing.metadata.base_url = agent.metadata.base_url;
            }
            return Ok(false);
        }
        state.snapshot.agents.insert(agent.address.clone(), agent);
        Ok(true)
    }

    async fn advance_agent_status(
        &self,
        address: &str,
        status: AgentStatus,
        owner: Option<String>,
    ) -> Result<DiscoveredAgent, RegistryError> {
        let mut state = self.state.write().await;
        let agent = state
            .snapshot
            .agents
            .get_mut(address)
            .ok_or_else(|| RegistryError::UnknownAgent(address.to_owned()))?;
        agent.advance(status)?;
        if owner.is_some() {
            agent.owner = owner;
        }
        Ok(agent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(path: &str, method: &str) -> ObservedEndpoint {
        let base: Url = "https://agent.example/".parse().unwrap();
        ObservedEndpoint {
            agent_address: "agent-1".into(),
            endpoint: base.join(path).unwrap(),
            base_url: base,
            method: method.into(),
            price: Decimal::new(1, 2),
            description: None,
            category: None,
            created_at: UnixTimestamp::from_secs(1),
        }
    }

    fn agent(address: &str) -> DiscoveredAgent {
        DiscoveredAgent::new(
            address.into(),
            DiscoveryMetadata {
                source: "test".into(),
                first_seen: UnixTimestamp::from_secs(1),
                environment: Some("solana".into()),
                base_url: None,
            },
        )
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_skipped() {
        let registry = MemoryRegistry::new();
        let first = import_endpoints(&registry, vec![endpoint("a", "GET")])
            .await
            .unwrap();
        assert_eq!(first, ImportSummary { imported: 1, skipped: 0 });

        let second = import_endpoints(&registry, vec![endpoint("a", "GET")])
            .await
            .unwrap();
        assert_eq!(second, ImportSummary { imported: 0, skipped: 1 });
        assert_eq!(registry.list_endpoints(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_method_is_part_of_the_key() {
        let registry = MemoryRegistry::new();
        let summary = import_endpoints(
            &registry,
            vec![endpoint("a", "GET"), endpoint("a", "POST"), endpoint("a", "GET")],
        )
        .await
        .unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 1 });
    }

    #[tokio::test]
    async fn test_list_endpoints_filters_by_agent() {
        let registry = MemoryRegistry::new();
        let mut other = endpoint("b", "GET");
        other.agent_address = "agent-2".into();
        registry
            .register_endpoints(vec![endpoint("a", "GET"), other])
            .await
            .unwrap();
        assert_eq!(registry.list_endpoints(Some("agent-2")).await.unwrap().len(), 1);
        assert_eq!(registry.list_endpoints(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_only_moves_forward() {
        let registry = MemoryRegistry::new();
        assert!(registry.upsert_agent(agent("agent-1")).await.unwrap());
        assert!(!registry.upsert_agent(agent("agent-1")).await.unwrap());

        let claimed = registry
            .advance_agent_status("agent-1", AgentStatus::Claimed, Some("owner".into()))
            .await
            .unwrap();
        assert_eq!(claimed.status, AgentStatus::Claimed);
        assert_eq!(claimed.owner.as_deref(), Some("owner"));

        registry
            .advance_agent_status("agent-1", AgentStatus::Verified, None)
            .await
            .unwrap();
        let err = registry
            .advance_agent_status("agent-1", AgentStatus::Discovered, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::BackwardTransition { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_drops_duplicates() {
        let snapshot = RegistrySnapshot {
            agents: BTreeMap::new(),
            endpoints: vec![endpoint("a", "GET"), endpoint("a", "GET")],
        };
        let registry = MemoryRegistry::from_snapshot(snapshot);
        assert_eq!(registry.snapshot().await.endpoints.len(), 1);
    }
}
