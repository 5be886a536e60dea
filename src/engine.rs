//! The single lock-guarded owner of the in-memory `embeddings`/`contents`/
//! `clusters` maps, and the seam every component and every API handler goes
//! through. Runs the ingestion → cluster → organize cycle.
//!
//! Grounded on `examples/original_source/backend/main.py`'s global-state
//! dicts and `process_files_batch`/`recluster_and_organize` functions,
//! restructured per SPEC_FULL.md §9's "single Engine value" design note: all
//! three maps share one `parking_lot::RwLock`, matching §5's requirement that
//! mutations and reads take the same coarse lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::chunk_index::ChunkIndex;
use crate::clusterer::{Clusterer, NOISE_CLUSTER_ID};
use crate::config::{
    SefsConfig, INGEST_RETRY_DELAY_MS, MAX_INGEST_RETRIES, MIN_DOCUMENT_CHARS, METADATA_DIR,
};
use crate::embedder::{embed_with_timeout, Embedder};
use crate::entropy::{calculate_entropy, EntropyMetrics};
use crate::error::{SefsError, SefsResult};
use crate::file_manager::FileManager;
use crate::monitor::FsEvent;
use crate::store::{Store, StoreStats};
use crate::text_extract::{extract_text, is_eligible};

#[derive(Default)]
struct EngineState {
    embeddings: HashMap<String, Vec<f32>>,
    contents: HashMap<String, String>,
    clusters: HashMap<String, (i64, String)>,
}

pub struct Engine {
    state: RwLock<EngineState>,
    store: Store,
    file_manager: Arc<FileManager>,
    chunk_index: Arc<ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    clusterer: Mutex<Clusterer>,
    config: SefsConfig,
    worker_pool: rayon::ThreadPool,
    embed_timeout: Duration,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub total_files: i64,
    pub total_clusters: i64,
    pub avg_content_length: f64,
    pub cached_files: usize,
    pub active_clusters: usize,
    pub entropy_score: f32,
    pub cohesion: f32,
    pub chunk_count: usize,
}

impl Engine {
    pub fn new(
        config: SefsConfig,
        store: Store,
        file_manager: Arc<FileManager>,
        chunk_index: Arc<ChunkIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> SefsResult<Self> {
        let worker_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_pool_size)
            .build()
            .map_err(|e| SefsError::Internal(anyhow::anyhow!(e)))?;

        let embed_timeout = Duration::from_secs(config.embed_timeout_secs);

        Ok(Self {
            state: RwLock::new(EngineState::default()),
            store,
            file_manager,
            chunk_index,
            embedder,
            clusterer: Mutex::new(Clusterer::new()),
            config,
            worker_pool,
            embed_timeout,
        })
    }

    pub fn monitor_root(&self) -> &Path {
        &self.config.monitor_root
    }

    /// Scans the monitored root for eligible files, ingests whichever aren't
    /// already fresh in the Store, and runs one Organizer pass if anything
    /// was found. Called once at startup.
    pub fn bootstrap(&self) -> SefsResult<()> {
        for (path, embedding, content) in self.store.load_all()? {
            let mut state = self.state.write();
            state.embeddings.insert(path.clone(), embedding);
            state.contents.insert(path, content);
        }

        let mut found = Vec::new();
        for entry in walkdir(&self.config.monitor_root) {
            if is_eligible(&entry) {
                found.push(entry);
            }
        }

        info!("bootstrap scan found {} eligible file(s)", found.len());
        let ingested = self.ingest_files(&found);
        if ingested > 0 || !self.state.read().embeddings.is_empty() {
            self.reorganize();
        }
        Ok(())
    }

    /// Dispatches a debounced batch of filesystem events: creations and
    /// modifications are ingested as a batch (one Organizer pass at the end
    /// if any succeeded), moves are remapped directly without re-running
    /// ingestion, and each deletion triggers its own Organizer pass —
    /// mirroring `event_callback` in the reference source.
    pub fn handle_batch(&self, events: Vec<FsEvent>) {
        let mut to_ingest = Vec::new();
        let mut moved = Vec::new();
        let mut deleted = Vec::new();

        for event in events {
            match event {
                FsEvent::Created(p) | FsEvent::Modified(p) => to_ingest.push(p),
                FsEvent::Moved { src, dest } => moved.push((src, dest)),
                FsEvent::Deleted(p) => deleted.push(p),
            }
        }

        if !to_ingest.is_empty() {
            let ingested = self.ingest_files(&to_ingest);
            if ingested > 0 {
                self.reorganize();
            }
        }

        for (src, dest) in moved {
            self.apply_external_move(&src, &dest);
        }

        for path in deleted {
            self.remove_path(&path.to_string_lossy());
            self.reorganize();
        }
    }

    /// Runs `process_file` over `paths` on the bounded worker pool, returning
    /// the number that were newly ingested or confirmed fresh.
    fn ingest_files(&self, paths: &[PathBuf]) -> usize {
        let results: Vec<bool> = self.worker_pool.install(|| {
            use rayon::prelude::*;
            paths.par_iter().map(|p| self.process_file(p)).collect()
        });
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Per-file ingestion pipeline (§4.4): a fresh Store hit short-circuits
    /// straight to populating in-memory state; otherwise extract, embed,
    /// persist, and register chunks, retrying transient failures.
    fn process_file(&self, path: &Path) -> bool {
        if !is_eligible(path) {
            return false;
        }
        let path_str = path.to_string_lossy().to_string();

        match self.store.get(&path_str) {
            Ok(Some(cached)) => {
                let mut state = self.state.write();
                state.embeddings.insert(path_str.clone(), cached.embedding);
                state.contents.insert(path_str.clone(), cached.content.clone());
                let (cid, label) = state
                    .clusters
                    .get(&path_str)
                    .cloned()
                    .unwrap_or((NOISE_CLUSTER_ID, String::new()));
                state.clusters.entry(path_str.clone()).or_insert((cid, label.clone()));
                drop(state);
                if let Err(e) = self.chunk_index.add(&path_str, &cached.content, cid, &label) {
                    warn!("chunk index add failed for {path_str}: {e}");
                }
                return true;
            }
            Ok(None) => {}
            Err(e) => warn!("store lookup failed for {path_str}: {e}"),
        }

        let attempt = retry(MAX_INGEST_RETRIES, Duration::from_millis(INGEST_RETRY_DELAY_MS), || {
            let text = extract_text(path)?.ok_or_else(|| anyhow::anyhow!("no extractor for {path_str}"))?;
            let embedding = embed_with_timeout(self.embedder.clone(), vec![text.clone()], self.embed_timeout)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))?;
            Ok::<_, anyhow::Error>((text, embedding))
        });

        let (text, embedding) = match attempt {
            Ok(pair) => pair,
            Err(e) => {
                error!("ingestion failed for {path_str} after {MAX_INGEST_RETRIES} attempts: {e}");
                return false;
            }
        };

        if text.trim().chars().count() < MIN_DOCUMENT_CHARS {
            return false;
        }

        let mtime = crate::store::file_mtime_secs(path).unwrap_or(0.0);

        let (cid, label) = {
            let mut state = self.state.write();
            state.embeddings.insert(path_str.clone(), embedding.clone());
            state.contents.insert(path_str.clone(), text.clone());
            state
                .clusters
                .get(&path_str)
                .cloned()
                .unwrap_or((NOISE_CLUSTER_ID, String::new()))
        };

        if let Err(e) = self.store.save(&path_str, &embedding, &text, mtime, cid, &label) {
            error!("store save failed for {path_str}: {e}");
        }
        if let Err(e) = self.chunk_index.add(&path_str, &text, cid, &label) {
            warn!("chunk index add failed for {path_str}: {e}");
        }

        info!("ingested {path_str}");
        true
    }

    /// Handles a raw rename the Monitor observed from outside the system
    /// (the user dragged a file): remaps in-memory state and the Store
    /// under the new path without re-running the ingestion pipeline.
    fn apply_external_move(&self, src: &Path, dest: &Path) {
        let src_str = src.to_string_lossy().to_string();
        let dest_str = dest.to_string_lossy().to_string();

        let mut state = self.state.write();
        let embedding = state.embeddings.remove(&src_str);
        let content = state.contents.remove(&src_str);
        let cluster = state.clusters.remove(&src_str);

        let (Some(embedding), Some(content)) = (embedding, content) else {
            drop(state);
            info!("move of untracked path {src_str} -> {dest_str}, nothing to remap");
            return;
        };

        state.embeddings.insert(dest_str.clone(), embedding);
        state.contents.insert(dest_str.clone(), content);
        if let Some(c) = cluster.clone() {
            state.clusters.insert(dest_str.clone(), c);
        }
        drop(state);

        if let Err(e) = self.store.move_path(&src_str, &dest_str) {
            error!("store move failed for {src_str} -> {dest_str}: {e}");
        }
        if let Err(e) = self.chunk_index.rename(&src_str, &dest_str) {
            warn!("chunk index rename failed for {src_str} -> {dest_str}: {e}");
        }
        info!("remapped moved file {src_str} -> {dest_str}");
    }

    /// Removes `path` from every in-memory map, the Store, and the
    /// ChunkIndex (§4.6 delete cascade, S4).
    fn remove_path(&self, path: &str) {
        let mut state = self.state.write();
        state.embeddings.remove(path);
        state.contents.remove(path);
        state.clusters.remove(path);
        drop(state);

        if let Err(e) = self.store.delete(path) {
            error!("store delete failed for {path}: {e}");
        }
        if let Err(e) = self.chunk_index.remove(path) {
            warn!("chunk index remove failed for {path}: {e}");
        }
        info!("removed deleted file {path}");
    }

    /// Prune → cluster → relocate → sweep (§4.6). Idempotent: a second call
    /// with no state change produces no filesystem moves.
    pub fn reorganize(&self) {
        let mut state = self.state.write();

        let on_disk: Vec<String> = state
            .embeddings
            .keys()
            .filter(|p| !Path::new(p).exists())
            .cloned()
            .collect();
        for path in &on_disk {
            state.embeddings.remove(path);
            state.contents.remove(path);
            state.clusters.remove(path);
        }

        if state.embeddings.is_empty() {
            drop(state);
            self.sweep_empty_dirs();
            return;
        }

        let assignments = {
            let mut clusterer = self.clusterer.lock();
            clusterer.cluster(
                &state.embeddings,
                &state.contents,
                self.config.cluster_eps,
                self.config.cluster_min_samples,
            )
        };

        let root = self.config.monitor_root.clone();
        for (path, assignment) in assignments {
            let cid = assignment.cluster_id;
            let label = assignment.topic_label;

            if cid == NOISE_CLUSTER_ID {
                state.clusters.insert(path.clone(), (cid, label.clone()));
                if let Err(e) = self.store.update_cluster(&path, cid, &label) {
                    error!("store update_cluster failed for {path}: {e}");
                }
                continue;
            }

            let folder = format!("{label}_{cid}");
            let target_dir = root.join(&folder);
            let basename = Path::new(&path)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_default();
            let target = target_dir.join(&basename);

            let already_placed = Path::new(&path)
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy() == folder)
                .unwrap_or(false);

            if already_placed {
                state.clusters.insert(path.clone(), (cid, label.clone()));
                if let Err(e) = self.store.update_cluster(&path, cid, &label) {
                    error!("store update_cluster failed for {path}: {e}");
                }
                continue;
            }

            let embedding = state.embeddings.remove(&path);
            let content = state.contents.remove(&path);
            state.clusters.remove(&path);

            let (Some(embedding), Some(content)) = (embedding, content) else {
                continue;
            };

            let target_str = target.to_string_lossy().to_string();
            state.embeddings.insert(target_str.clone(), embedding);
            state.contents.insert(target_str.clone(), content);
            state.clusters.insert(target_str.clone(), (cid, label.clone()));

            if let Err(e) = self.store.move_path(&path, &target_str) {
                error!("store move_path failed for {path} -> {target_str}: {e}");
            }
            if let Err(e) = self.store.update_cluster(&target_str, cid, &label) {
                error!("store update_cluster failed for {target_str}: {e}");
            }
            if let Err(e) = self.chunk_index.rename(&path, &target_str) {
                warn!("chunk index rename failed for {path} -> {target_str}: {e}");
            }
            if let Err(e) = self.chunk_index.update_cluster_info(&target_str, cid, &label) {
                warn!("chunk index update_cluster_info failed for {target_str}: {e}");
            }
            if let Err(e) = self.file_manager.move_file(Path::new(&path), &target) {
                error!("file move failed for {path} -> {target_str}: {e}");
            }
        }

        drop(state);
        self.sweep_empty_dirs();
    }

    fn sweep_empty_dirs(&self) {
        let root = &self.config.monitor_root;
        let Ok(entries) = std::fs::read_dir(root) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(METADATA_DIR) {
                continue;
            }
            let is_empty = std::fs::read_dir(&path).map(|mut e| e.next().is_none()).unwrap_or(false);
            if is_empty {
                let _ = std::fs::remove_dir(&path);
            }
        }
    }

    /// Updates a single file's cluster assignment in response to the
    /// `/move-file` API call, re-entering the same move machinery the
    /// Organizer uses.
    pub fn move_file_to_cluster(&self, path: &str, target_cluster: &str) -> SefsResult<()> {
        let (label, cid) = target_cluster
            .rsplit_once('_')
            .ok_or_else(|| SefsError::BadRequest("target_cluster must be \"{label}_{id}\"".into()))?;
        let cid: i64 = cid
            .parse()
            .map_err(|_| SefsError::BadRequest("target_cluster id is not an integer".into()))?;

        let mut state = self.state.write();
        if !state.embeddings.contains_key(path) {
            return Err(SefsError::FileNotFound(path.to_string()));
        }

        let folder = format!("{label}_{cid}");
        let target_dir = self.config.monitor_root.join(&folder);
        let basename = Path::new(path).file_name().map(PathBuf::from).unwrap_or_default();
        let target = target_dir.join(&basename);
        let target_str = target.to_string_lossy().to_string();

        let embedding = state.embeddings.remove(path);
        let content = state.contents.remove(path);
        state.clusters.remove(path);

        let (Some(embedding), Some(content)) = (embedding, content) else {
            return Err(SefsError::FileNotFound(path.to_string()));
        };

        state.embeddings.insert(target_str.clone(), embedding);
        state.contents.insert(target_str.clone(), content);
        state.clusters.insert(target_str.clone(), (cid, label.to_string()));
        drop(state);

        self.store.move_path(path, &target_str)?;
        self.store.update_cluster(&target_str, cid, label)?;
        self.chunk_index.rename(path, &target_str)?;
        self.chunk_index.update_cluster_info(&target_str, cid, label)?;
        self.file_manager.move_file(Path::new(path), &target)?;
        self.sweep_empty_dirs();
        Ok(())
    }

    /// Returns `(path, similarity, content)` for the `top_k` documents most
    /// similar to `query` under cosine similarity (S5).
    pub fn search(&self, query: &str, top_k: usize) -> SefsResult<Vec<(String, f32, String)>> {
        let query_vec = embed_with_timeout(self.embedder.clone(), vec![query.to_string()], self.embed_timeout)?
            .into_iter()
            .next()
            .unwrap_or_default();
        let state = self.state.read();
        let mut scored: Vec<(String, f32, String)> = state
            .embeddings
            .iter()
            .map(|(path, emb)| {
                let similarity = crate::embedder::cosine_similarity(&query_vec, emb);
                let content = state.contents.get(path).cloned().unwrap_or_default();
                (path.clone(), similarity, content)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn stats(&self) -> SefsResult<EngineStats> {
        let store_stats: StoreStats = self.store.stats()?;
        let state = self.state.read();
        let entropy = self.entropy_metrics_locked(&state);
        let active_clusters: std::collections::HashSet<i64> = state
            .clusters
            .values()
            .filter(|(cid, _)| *cid != NOISE_CLUSTER_ID)
            .map(|(cid, _)| *cid)
            .collect();

        Ok(EngineStats {
            total_files: store_stats.total_files,
            total_clusters: store_stats.total_clusters,
            avg_content_length: store_stats.avg_content_length,
            cached_files: state.embeddings.len(),
            active_clusters: active_clusters.len(),
            entropy_score: entropy.entropy,
            cohesion: entropy.cohesion,
            chunk_count: self.chunk_index.chunk_count(),
        })
    }

    pub fn entropy_metrics(&self) -> EntropyMetrics {
        let state = self.state.read();
        self.entropy_metrics_locked(&state)
    }

    fn entropy_metrics_locked(&self, state: &EngineState) -> EntropyMetrics {
        let labels: HashMap<String, i64> = state.clusters.iter().map(|(p, (cid, _))| (p.clone(), *cid)).collect();
        calculate_entropy(&state.embeddings, &labels)
    }

    /// Returns `(path, cluster_id, topic_label)` for every tracked file —
    /// the raw material for `/graph` and `/clusters`.
    pub fn snapshot(&self) -> Vec<(String, i64, String)> {
        let state = self.state.read();
        state
            .embeddings
            .keys()
            .map(|path| {
                let (cid, label) = state
                    .clusters
                    .get(path)
                    .cloned()
                    .unwrap_or((NOISE_CLUSTER_ID, "Uncategorized".to_string()));
                (path.clone(), cid, label)
            })
            .collect()
    }

    pub fn chunk_index(&self) -> &Arc<ChunkIndex> {
        &self.chunk_index
    }

    pub fn config(&self) -> &SefsConfig {
        &self.config
    }
}

/// Calls `f` up to `attempts` times, sleeping `delay` between tries. Returns
/// the last error if every attempt fails.
fn retry<T>(attempts: u32, delay: Duration, mut f: impl FnMut() -> anyhow::Result<T>) -> anyhow::Result<T> {
    let mut last_err = None;
    for attempt in 0..attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!("attempt {}/{attempts} failed: {e}", attempt + 1);
                last_err = Some(e);
                if attempt + 1 < attempts {
                    std::thread::sleep(delay);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry loop ran zero attempts")))
}

fn walkdir(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut builder = ignore::WalkBuilder::new(root);
    builder.hidden(false).git_ignore(false).git_global(false).git_exclude(false);
    for entry in builder.build().flatten() {
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == METADATA_DIR) {
            continue;
        }
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            out.push(path.to_path_buf());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_succeeds_on_a_later_attempt() {
        let mut calls = 0;
        let result = retry(3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 2 {
                anyhow::bail!("transient");
            }
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: anyhow::Result<()> = retry(3, Duration::from_millis(1), || {
            calls += 1;
            anyhow::bail!("always fails")
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    /// A deterministic stand-in for the Qwen3 embedder: buckets text into
    /// one of two near-orthogonal directions by whether it contains "cat" or
    /// "dog", so clustering/search behavior is exercised without a model.
    struct FakeEmbedder;

    impl crate::embedder::Embedder for FakeEmbedder {
        fn embed(&self, texts: &[&str]) -> SefsResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }
    }

    fn fake_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; crate::embedder::EMBEDDING_DIM];
        if text.to_lowercase().contains("cat") {
            v[0] = 1.0;
        } else if text.to_lowercase().contains("dog") {
            v[1] = 1.0;
        } else {
            v[2] = 1.0;
        }
        v
    }

    fn test_engine(root: &Path) -> Engine {
        let mut config = SefsConfig::from_env();
        config.monitor_root = root.to_path_buf();
        config.worker_pool_size = 2;
        config.cluster_min_samples = 1;
        config.cluster_eps = 0.3;

        let store = Store::new(config.store_path()).unwrap();
        let file_manager = Arc::new(FileManager::new(root, Duration::from_millis(20)));
        let embedder: Arc<dyn crate::embedder::Embedder> = Arc::new(FakeEmbedder);
        let chunk_index = Arc::new(
            ChunkIndex::new(config.chroma_dir(), embedder.clone(), 50, 10, Duration::from_secs(5)).unwrap(),
        );

        Engine::new(config, store, file_manager, chunk_index, embedder).unwrap()
    }

    #[test]
    fn bootstrap_ingests_and_reorganizes_into_topic_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "all about cats and cat behavior").unwrap();
        std::fs::write(dir.path().join("b.txt"), "all about dogs and dog training").unwrap();

        let engine = test_engine(dir.path());
        engine.bootstrap().unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 2);
        for (path, cid, _label) in &snapshot {
            assert_ne!(*cid, NOISE_CLUSTER_ID, "expected {path} to land in a cluster, not noise");
            assert!(Path::new(path).exists(), "{path} should exist on disk after reorganize");
        }

        let stats = engine.stats().unwrap();
        assert_eq!(stats.cached_files, 2);
    }

    #[test]
    fn handle_batch_removes_deleted_file_from_every_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "all about cats and cat behavior").unwrap();

        let engine = test_engine(dir.path());
        engine.bootstrap().unwrap();
        assert_eq!(engine.snapshot().len(), 1);

        std::fs::remove_file(&path).unwrap();
        engine.handle_batch(vec![FsEvent::Deleted(path)]);

        assert!(engine.snapshot().is_empty());
        assert_eq!(engine.stats().unwrap().cached_files, 0);
    }

    #[test]
    fn search_ranks_the_matching_document_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "all about cats and cat behavior").unwrap();
        std::fs::write(dir.path().join("b.txt"), "all about dogs and dog training").unwrap();

        let engine = test_engine(dir.path());
        engine.bootstrap().unwrap();

        let hits = engine.search("cat", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].0.contains("a.txt"));
        assert!(hits[0].1 >= hits[1].1);
    }
}
