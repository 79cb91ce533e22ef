//! Application state.

use std::sync::Arc;

use crowdmon_worker::{Orchestrator, WorkerConfig};

use crate::config::ApiConfig;
use crate::storage::LocalStorage;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Orchestrator,
    pub storage: Arc<LocalStorage>,
}

impl AppState {
    /// Create storage and an orchestrator reading uploads from it.
    ///
    /// Annotated output is always written to the storage's processed
    /// directory so it can be served back.
    pub async fn new(config: ApiConfig, mut worker: WorkerConfig) -> std::io::Result<Self> {
        let storage = LocalStorage::new(&config.storage_dir).await?;
        worker.output_dir = storage.processed_dir().to_path_buf();
        let orchestrator = Orchestrator::from_config(worker, storage.uploads_dir());

        Ok(Self::from_parts(config, storage, orchestrator))
    }

    pub fn from_parts(config: ApiConfig, storage: LocalStorage, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
            storage: Arc::new(storage),
        }
    }
}
