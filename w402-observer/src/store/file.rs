//! File-backed store: a JSON registry snapshot plus a JSON-lines run log.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use w402::observation::{MemoryObservationLog, ObservationLog, ObservationRun};
use w402::registry::{
    AgentStatus, DiscoveredAgent, EndpointKey, EndpointRegistry, MemoryRegistry, ObservedEndpoint,
    Registration, RegistryError, RegistrySnapshot,
};

const SNAPSHOT_FILE: &str = "registry.json";
const LOG_FILE: &str = "observations.jsonl";

fn storage(context: &str, e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Storage(format!("{context}: {e}"))
}

/// Durable store rooted at one directory.
///
/// The registry is rewritten as a whole after every change; observation runs
/// are appended one JSON object per line and never rewritten.
#[derive(Debug)]
pub struct FileStore {
    snapshot_path: PathBuf,
    log_path: PathBuf,
    registry: MemoryRegistry,
    log: MemoryObservationLog,
    write: Mutex<()>,
    commit: Mutex<()>,
}

impl FileStore {
    /// Opens (or creates) a store in `dir`.
    ///
    /// Unparseable log lines are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if the directory cannot be created
    /// or the snapshot cannot be read.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| storage("create data dir", e))?;
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let log_path = dir.join(LOG_FILE);

        let snapshot = match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => serde_json::from_slice::<RegistrySnapshot>(&bytes)
                .map_err(|e| storage("parse registry snapshot", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistrySnapshot::default(),
            Err(e) => return Err(storage("read registry snapshot", e)),
        };

        let runs = match tokio::fs::read_to_string(&log_path).await {
            Ok(text) => parse_runs(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(storage("read observation log", e)),
        };

        tracing::info!(
            dir = %dir.display(),
            agents = snapshot.agents.len(),
            endpoints = snapshot.endpoints.len(),
            runs = runs.len(),
            "Opened file store"
        );

        Ok(Self {
            snapshot_path,
            log_path,
            registry: MemoryRegistry::from_snapshot(snapshot),
            log: MemoryObservationLog::from_runs(runs),
            write: Mutex::new(()),
            commit: Mutex::new(()),
        })
    }

    async fn persist_snapshot(&self) -> Result<(), RegistryError> {
        let _guard = self.write.lock().await;
        let snapshot = self.registry.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| storage("encode registry", e))?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| storage("write registry snapshot", e))?;
        tokio::fs::rename(&tmp, &self.snapshot_path)
            .await
            .map_err(|e| storage("replace registry snapshot", e))
    }

    /// Persists a registry change made since `prior` was taken, restoring
    /// `prior` in memory if the write fails.
    async fn persist_or_restore(&self, prior: RegistrySnapshot) -> Result<(), RegistryError> {
        match self.persist_snapshot().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Registry write failed, rolling back");
                self.registry.restore(prior).await;
                Err(e)
            }
        }
    }
}

fn parse_runs(text: &str) -> Vec<ObservationRun> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(run) => Some(run),
            Err(e) => {
                tracing::warn!(line = n + 1, error = %e, "Skipping malformed observation record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl EndpointRegistry for FileStore {
    async fn register_endpoints(
        &self,
        endpoints: Vec<ObservedEndpoint>,
    ) -> Result<Vec<Registration>, RegistryError> {
        let _commit = self.commit.lock().await;
        let prior = self.registry.snapshot().await;
        let outcomes = self.registry.register_endpoints(endpoints).await?;
        if outcomes.contains(&Registration::Imported) {
            self.persist_or_restore(prior).await?;
        }
        Ok(outcomes)
    }

    async fn list_endpoints(
        &self,
        agent_address: Option<&str>,
    ) -> Result<Vec<ObservedEndpoint>, RegistryError> {
        self.registry.list_endpoints(agent_address).await
    }

    async fn list_agents(&self) -> Result<Vec<DiscoveredAgent>, RegistryError> {
        self.registry.list_agents().await
    }

    async fn upsert_agent(&self, agent: DiscoveredAgent) -> Result<bool, RegistryError> {
        let _commit = self.commit.lock().await;
        let prior = self.registry.snapshot().await;
        let inserted = self.registry.upsert_agent(agent).await?;
        self.persist_or_restore(prior).await?;
        Ok(inserted)
    }

    async fn advance_agent_status(
        &self,
        address: &str,
        status: AgentStatus,
        owner: Option<String>,
    ) -> Result<DiscoveredAgent, RegistryError> {
        let _commit = self.commit.lock().await;
        let prior = self.registry.snapshot().await;
        let agent = self
            .registry
            .advance_agent_status(address, status, owner)
            .await?;
        self.persist_or_restore(prior).await?;
        Ok(agent)
    }
}

#[async_trait]
impl ObservationLog for FileStore {
    async fn append(&self, run: ObservationRun) -> Result<(), RegistryError> {
        let mut line = serde_json::to_vec(&run).map_err(|e| storage("encode observation", e))?;
        line.push(b'\n');
        {
            let _guard = self.write.lock().await;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .await
                .map_err(|e| storage("open observation log", e))?;
            file.write_all(&line)
                .await
                .map_err(|e| storage("append observation", e))?;
            file.flush()
                .await
                .map_err(|e| storage("flush observation log", e))?;
        }
        self.log.append(run).await
    }

    async fn history(&self, endpoint: &EndpointKey) -> Result<Vec<ObservationRun>, RegistryError> {
        self.log.history(endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use w402::observation::EndpointState;
    use w402::registry::DiscoveryMetadata;
    use w402::timestamp::UnixTimestamp;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("w402-store-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn endpoint(path: &str) -> ObservedEndpoint {
        ObservedEndpoint {
            agent_address: "agent".to_owned(),
            base_url: "https://agent.example/".parse().unwrap(),
            endpoint: format!("https://agent.example/{path}").parse().unwrap(),
            method: "GET".to_owned(),
            price: "0.01".parse().unwrap(),
            description: None,
            category: None,
            created_at: UnixTimestamp::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_registry_and_log_survive_reopen() {
        let dir = temp_dir("reopen");
        {
            let store = FileStore::open(&dir).await.unwrap();
            store
                .upsert_agent(DiscoveredAgent::new(
                    "agent".to_owned(),
                    DiscoveryMetadata {
                        source: "test".to_owned(),
                        first_seen: UnixTimestamp::from_secs(1),
                        environment: None,
                        base_url: None,
                    },
                ))
                .await
                .unwrap();
            store
                .register_endpoints(vec![endpoint("a"), endpoint("b")])
                .await
                .unwrap();
            store
                .append(ObservationRun {
                    endpoint: endpoint("a").key(),
                    observed_at: UnixTimestamp::from_secs(2),
                    latency_ms: 12,
                    http_status: Some(200),
                    outcome: EndpointState::Free,
                    error_class: None,
                    settlement_tx: None,
                    detail: None,
                })
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&dir).await.unwrap();
        assert_eq!(reopened.list_agents().await.unwrap().len(), 1);
        let outcomes = reopened.register_endpoints(vec![endpoint("a")]).await.unwrap();
        assert_eq!(outcomes, vec![Registration::Skipped]);
        let history = reopened.history(&endpoint("a").key()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].latency_ms, 12);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_rolls_back_registration() {
        let dir = temp_dir("rollback");
        let store = FileStore::open(&dir).await.unwrap();
        let blocker = dir.join("registry.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(store.register_endpoints(vec![endpoint("a")]).await.is_err());
        assert!(store.list_endpoints(None).await.unwrap().is_empty());

        std::fs::remove_dir(&blocker).unwrap();
        let outcomes = store.register_endpoints(vec![endpoint("a")]).await.unwrap();
        assert_eq!(outcomes, vec![Registration::Imported]);
        let reopened = FileStore::open(&dir).await.unwrap();
        assert_eq!(reopened.list_endpoints(None).await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_malformed_log_lines_are_skipped() {
        let line = serde_json::to_string(&ObservationRun {
            endpoint: endpoint("a").key(),
            observed_at: UnixTimestamp::from_secs(2),
            latency_ms: 1,
            http_status: None,
            outcome: EndpointState::Failed,
            error_class: Some(w402::ErrorClass::Timeout),
            settlement_tx: None,
            detail: None,
        })
        .unwrap();
        let runs = parse_runs(&format!("{line}\n{{broken\n\n{line}\n"));
        assert_eq!(runs.len(), 2);
    }
}
