//! A vector index over overlapping word windows of each ingested document,
//! used by the QA pipeline to retrieve the passages most relevant to a
//! question (§4.7).
//!
//! Grounded on `examples/original_source/backend/rag_engine.py` for the
//! chunking law (word windows, not characters) and the metadata
//! replace-semantics fix recorded in SPEC_FULL.md §9; on
//! `vyotiq-backend/src/embedder.rs`'s `WorkspaceVectorState` for the Rust
//! `usearch::Index` idiom (options, save/load, CAS-guarded rebuilds).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::MIN_CHUNK_CHARS;
use crate::embedder::{embed_with_timeout, Embedder, EMBEDDING_DIM};
use crate::error::{SefsError, SefsResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub filepath: String,
    pub filename: String,
    pub chunk_index: usize,
    pub word_count: usize,
    pub cluster_id: i64,
    pub topic_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub filepath: String,
    pub filename: String,
    pub chunk_index: usize,
    pub cluster_id: i64,
    pub topic_label: String,
    pub text: String,
    pub similarity: f32,
}

struct IndexState {
    index: Index,
    /// Chunk metadata keyed by the same `u64` the vector index uses.
    metadata: HashMap<u64, ChunkMeta>,
    /// Chunk text kept alongside metadata; usearch itself is vectors-only.
    texts: HashMap<u64, String>,
    next_key: u64,
    meta_path: PathBuf,
    index_path: PathBuf,
}

pub struct ChunkIndex {
    state: RwLock<IndexState>,
    embedder: Arc<dyn Embedder>,
    window: usize,
    overlap: usize,
    embed_timeout: Duration,
}

#[derive(Serialize, Deserialize)]
struct PersistedMeta {
    next_key: u64,
    entries: Vec<(u64, ChunkMeta, String)>,
}

impl ChunkIndex {
    pub fn new(
        dir: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        window: usize,
        overlap: usize,
        embed_timeout: Duration,
    ) -> SefsResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let index_path = dir.join("chunks.usearch");
        let meta_path = dir.join("chunks_meta.json");

        let options = IndexOptions {
            dimensions: EMBEDDING_DIM,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F16,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| SefsError::ChunkIndex(e.to_string()))?;
        index.reserve(4096).map_err(|e| SefsError::ChunkIndex(e.to_string()))?;

        let mut metadata = HashMap::new();
        let mut texts = HashMap::new();
        let mut next_key = 0u64;

        if index_path.exists() && meta_path.exists() {
            if let Some(path_str) = index_path.to_str() {
                index.load(path_str).map_err(|e| SefsError::ChunkIndex(e.to_string()))?;
            }
            if let Ok(raw) = std::fs::read_to_string(&meta_path) {
                if let Ok(persisted) = serde_json::from_str::<PersistedMeta>(&raw) {
                    next_key = persisted.next_key;
                    for (key, meta, text) in persisted.entries {
                        metadata.insert(key, meta);
                        texts.insert(key, text);
                    }
                }
            }
        }

        Ok(Self {
            state: RwLock::new(IndexState {
                index,
                metadata,
                texts,
                next_key,
                meta_path,
                index_path,
            }),
            embedder,
            window,
            overlap,
            embed_timeout,
        })
    }

    /// Windows `text` into overlapping word chunks, embeds each admitted
    /// window, and upserts them. Any previously indexed chunks for `path` are
    /// removed first so a re-ingested file never accumulates stale windows.
    pub fn add(
        &self,
        path: &str,
        text: &str,
        cluster_id: i64,
        topic_label: &str,
    ) -> SefsResult<usize> {
        self.remove(path)?;

        let windows = word_windows(text, self.window, self.overlap, MIN_CHUNK_CHARS);
        if windows.is_empty() {
            return Ok(0);
        }

        let owned: Vec<String> = windows.iter().map(|(w, _)| w.clone()).collect();
        let vectors = embed_with_timeout(self.embedder.clone(), owned, self.embed_timeout)?;

        let filename = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();

        let mut state = self.state.write();
        let mut admitted = 0;
        for (chunk_index, ((window_text, word_count), vector)) in
            windows.into_iter().zip(vectors.into_iter()).enumerate()
        {
            let key = state.next_key;
            state.next_key += 1;
            state
                .index
                .add(key, &vector)
                .map_err(|e| SefsError::ChunkIndex(e.to_string()))?;
            state.metadata.insert(
                key,
                ChunkMeta {
                    filepath: path.to_string(),
                    filename: filename.clone(),
                    chunk_index,
                    word_count,
                    cluster_id,
                    topic_label: topic_label.to_string(),
                },
            );
            state.texts.insert(key, window_text);
            admitted += 1;
        }
        self.persist(&state)?;
        Ok(admitted)
    }

    /// Deletes every chunk previously registered for `path`.
    pub fn remove(&self, path: &str) -> SefsResult<()> {
        let mut state = self.state.write();
        let stale: Vec<u64> = state
            .metadata
            .iter()
            .filter(|(_, m)| m.filepath == path)
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            let _ = state.index.remove(*key);
            state.metadata.remove(key);
            state.texts.remove(key);
        }
        if !stale.is_empty() {
            self.persist(&state)?;
        }
        Ok(())
    }

    /// Re-keys every chunk's `filepath`/`filename` metadata from `old_path`
    /// to `new_path` without re-windowing or re-embedding, mirroring the
    /// Store's primary-key rename (§4.1) rather than a delete-and-reinsert.
    pub fn rename(&self, old_path: &str, new_path: &str) -> SefsResult<()> {
        let mut state = self.state.write();
        let keys: Vec<u64> = state
            .metadata
            .iter()
            .filter(|(_, m)| m.filepath == old_path)
            .map(|(k, _)| *k)
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        let filename = Path::new(new_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(new_path)
            .to_string();
        for key in &keys {
            if let Some(existing) = state.metadata.get_mut(key) {
                existing.filepath = new_path.to_string();
                existing.filename = filename.clone();
            }
        }
        self.persist(&state)?;
        Ok(())
    }

    /// Updates only `cluster_id`/`topic_label` on every chunk belonging to
    /// `path`, re-writing the full metadata row each time — a read-modify-write,
    /// never a partial patch (SPEC_FULL.md §9).
    pub fn update_cluster_info(&self, path: &str, cluster_id: i64, topic_label: &str) -> SefsResult<()> {
        let mut state = self.state.write();
        let keys: Vec<u64> = state
            .metadata
            .iter()
            .filter(|(_, m)| m.filepath == path)
            .map(|(k, _)| *k)
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        for key in &keys {
            if let Some(existing) = state.metadata.get(key).cloned() {
                state.metadata.insert(
                    *key,
                    ChunkMeta {
                        filepath: existing.filepath,
                        filename: existing.filename,
                        chunk_index: existing.chunk_index,
                        word_count: existing.word_count,
                        cluster_id,
                        topic_label: topic_label.to_string(),
                    },
                );
            }
        }
        self.persist(&state)?;
        Ok(())
    }

    /// Embeds `query` and returns the `k` nearest chunks, optionally
    /// restricted to a single cluster.
    pub fn search(&self, query: &str, k: usize, cluster_filter: Option<i64>) -> SefsResult<Vec<ChunkHit>> {
        let state = self.state.read();
        if state.index.size() == 0 {
            return Ok(Vec::new());
        }
        drop(state);

        let query_vec = embed_with_timeout(self.embedder.clone(), vec![query.to_string()], self.embed_timeout)?
            .into_iter()
            .next()
            .unwrap_or_default();
        let state = self.state.read();

        // usearch has no native metadata filter, so over-fetch then filter.
        let fetch = if cluster_filter.is_some() { (k * 8).max(k) } else { k };
        let matches = state
            .index
            .search(&query_vec, fetch)
            .map_err(|e| SefsError::ChunkIndex(e.to_string()))?;

        let mut hits = Vec::new();
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(meta) = state.metadata.get(key) else { continue };
            if let Some(cid) = cluster_filter {
                if meta.cluster_id != cid {
                    continue;
                }
            }
            let text = state.texts.get(key).cloned().unwrap_or_default();
            hits.push(ChunkHit {
                filepath: meta.filepath.clone(),
                filename: meta.filename.clone(),
                chunk_index: meta.chunk_index,
                cluster_id: meta.cluster_id,
                topic_label: meta.topic_label.clone(),
                text,
                similarity: 1.0 - distance,
            });
            if hits.len() >= k {
                break;
            }
        }
        Ok(hits)
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().index.size()
    }

    fn persist(&self, state: &IndexState) -> SefsResult<()> {
        if let Some(path_str) = state.index_path.to_str() {
            state
                .index
                .save(path_str)
                .map_err(|e| SefsError::ChunkIndex(e.to_string()))?;
        }
        let entries: Vec<(u64, ChunkMeta, String)> = state
            .metadata
            .iter()
            .map(|(k, m)| (*k, m.clone(), state.texts.get(k).cloned().unwrap_or_default()))
            .collect();
        let persisted = PersistedMeta {
            next_key: state.next_key,
            entries,
        };
        let raw = serde_json::to_string(&persisted).map_err(SefsError::Serde)?;
        std::fs::write(&state.meta_path, raw)?;
        Ok(())
    }
}

/// Splits `text` into word windows of `window` words with stride
/// `window - overlap`, discarding windows shorter than `min_chars`
/// characters. Returns `(window_text, word_count)` pairs.
fn word_windows(text: &str, window: usize, overlap: usize, min_chars: usize) -> Vec<(String, usize)> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let stride = window.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let end = (i + window).min(words.len());
        let slice = &words[i..end];
        let joined = slice.join(" ");
        if joined.len() >= min_chars {
            out.push((joined, slice.len()));
        }
        if end == words.len() {
            break;
        }
        i += stride;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_windows_strides_by_window_minus_overlap() {
        let text = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
        let windows = word_windows(&text, 4, 1, 0);
        assert_eq!(windows[0].0, "1 2 3 4");
        assert_eq!(windows[1].0, "4 5 6 7");
    }

    #[test]
    fn word_windows_drops_short_trailing_window() {
        let text = "a b c d e";
        let windows = word_windows(text, 4, 0, 50);
        assert!(windows.iter().all(|(w, _)| w.len() >= 50) || windows.is_empty());
    }

    #[test]
    fn word_windows_empty_text_yields_no_windows() {
        assert!(word_windows("", 10, 2, 10).is_empty());
    }
}
