//! Persistence for the registry and the observation log.

mod file;

pub use file::FileStore;

use std::sync::Arc;
use w402::observation::{MemoryObservationLog, ObservationLog};
use w402::registry::{EndpointRegistry, MemoryRegistry, RegistryError};

use crate::config::StoreConfig;

/// Registry and observation log handles, possibly backed by the same store.
#[derive(Clone)]
pub struct Store {
    /// Agents and endpoints.
    pub registry: Arc<dyn EndpointRegistry>,
    /// Observation history.
    pub log: Arc<dyn ObservationLog>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// A store that lives only as long as the process.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            registry: Arc::new(MemoryRegistry::new()),
            log: Arc::new(MemoryObservationLog::new()),
        }
    }

    /// Opens the configured store: file-backed when `data_dir` is set.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if existing files cannot be read.
    pub async fn open(config: &StoreConfig) -> Result<Self, RegistryError> {
        match &config.data_dir {
            None => Ok(Self::memory()),
            Some(dir) => {
                let store = Arc::new(FileStore::open(dir).await?);
                Ok(Self {
                    registry: Arc::clone(&store) as Arc<dyn EndpointRegistry>,
                    log: store,
                })
            }
        }
    }
}
