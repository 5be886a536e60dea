//! Shared application state handed to every axum route.
//!
//! Grounded on `vyotiq-backend/src/state.rs`'s `AppState` pattern, narrowed
//! to the handles this system's single monitored root needs: no workspace
//! registry, no WebSocket broadcast channel (the API here is read-mostly
//! projections of the Engine, not a live event stream).

use std::sync::Arc;

use crate::chunk_index::ChunkIndex;
use crate::config::SefsConfig;
use crate::embedder::{Embedder, Qwen3Embedder};
use crate::engine::Engine;
use crate::error::{SefsError, SefsResult};
use crate::file_manager::FileManager;
use crate::monitor::Monitor;
use crate::qa::QaPipeline;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: SefsConfig,
    pub engine: Arc<Engine>,
    pub qa: Arc<QaPipeline>,
    pub monitor: Arc<Monitor>,
}

impl AppState {
    pub async fn new(config: SefsConfig) -> SefsResult<Self> {
        std::fs::create_dir_all(&config.monitor_root)?;
        std::fs::create_dir_all(config.metadata_dir())?;

        let store = Store::new(config.store_path())?;
        let file_manager = Arc::new(FileManager::new(
            config.monitor_root.clone(),
            std::time::Duration::from_millis(config.settle_ms),
        ));
        let embed_timeout = std::time::Duration::from_secs(config.embed_timeout_secs);
        let embedder: Arc<dyn Embedder> = Arc::new(Qwen3Embedder::new());
        let chunk_index = Arc::new(ChunkIndex::new(
            config.metadata_dir(),
            embedder.clone(),
            config.chunk_size,
            config.chunk_overlap,
            embed_timeout,
        )?);

        let engine = Arc::new(Engine::new(
            config.clone(),
            store,
            file_manager.clone(),
            chunk_index,
            embedder,
        )?);

        engine.bootstrap()?;

        let qa = Arc::new(QaPipeline::new(&config));

        let engine_for_monitor = engine.clone();
        let monitor = Arc::new(
            Monitor::start(
                config.monitor_root.clone(),
                std::time::Duration::from_millis(config.debounce_ms),
                file_manager,
                move |events| engine_for_monitor.handle_batch(events),
            )
            .map_err(|e| SefsError::Internal(anyhow::anyhow!(e)))?,
        );

        Ok(Self {
            config,
            engine,
            qa,
            monitor,
        })
    }
}
