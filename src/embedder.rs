//! The sentence-embedding model is an external collaborator by design (a
//! pure `text -> fixed-length vector` function); this module defines that
//! boundary as a trait and provides the default concrete implementation.
//!
//! Grounded on `vyotiq-backend/src/embedder.rs`: same lazy double-checked-lock
//! model init, same Qwen3-Embedding-0.6B / candle backend, same L2-normalized
//! output via last-token pooling. Narrowed to whole-document and chunk
//! embedding (no per-workspace vector index bookkeeping here — that lives in
//! `chunk_index.rs`).

use candle_core::{DType, Device};
use fastembed::Qwen3TextEmbedding;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::error::{SefsError, SefsResult};

pub const EMBEDDING_DIM: usize = 1024;
const QWEN3_REPO_ID: &str = "Qwen/Qwen3-Embedding-0.6B";
const QWEN3_MAX_LENGTH: usize = 8192;

/// A pure text -> vector function. The concrete embedding model is explicitly
/// out of this system's scope; this trait is the seam a different model
/// would plug into.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[&str]) -> SefsResult<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> SefsResult<Vec<f32>> {
        Ok(self.embed(&[text])?.into_iter().next().unwrap_or_default())
    }
}

pub struct Qwen3Embedder {
    model: Mutex<Option<Qwen3TextEmbedding>>,
    initialized: AtomicBool,
}

impl Qwen3Embedder {
    pub fn new() -> Self {
        Self {
            model: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_model(&self) -> SefsResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut guard = self
            .model
            .lock()
            .map_err(|e| SefsError::Embedding(format!("model lock poisoned: {e}")))?;

        if guard.is_some() {
            self.initialized.store(true, Ordering::Release);
            return Ok(());
        }

        info!(
            "Initializing {} ({}d, max_len={})...",
            QWEN3_REPO_ID, EMBEDDING_DIM, QWEN3_MAX_LENGTH
        );

        let device = Device::Cpu;
        let model = Qwen3TextEmbedding::from_hf(QWEN3_REPO_ID, &device, DType::F32, QWEN3_MAX_LENGTH)
            .map_err(|e| SefsError::Embedding(format!("failed to init embedding model: {e}")))?;

        let actual_dim = model.config().hidden_size;
        if actual_dim != EMBEDDING_DIM {
            return Err(SefsError::Embedding(format!(
                "model dimension mismatch: expected {EMBEDDING_DIM} but got {actual_dim}"
            )));
        }

        *guard = Some(model);
        self.initialized.store(true, Ordering::Release);
        info!("{} initialized ({}d, candle CPU)", QWEN3_REPO_ID, EMBEDDING_DIM);
        Ok(())
    }
}

impl Default for Qwen3Embedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for Qwen3Embedder {
    fn embed(&self, texts: &[&str]) -> SefsResult<Vec<Vec<f32>>> {
        self.ensure_model()?;
        let guard = self
            .model
            .lock()
            .map_err(|e| SefsError::Embedding(format!("model lock poisoned: {e}")))?;
        let model = guard
            .as_ref()
            .ok_or_else(|| SefsError::Embedding("embedding model not initialized".into()))?;

        let docs: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        model
            .embed(&docs)
            .map_err(|e| SefsError::Embedding(format!("embedding failed: {e}")))
    }
}

/// Runs `embedder.embed(texts)` on a dedicated thread and enforces `timeout`
/// against it, so a stalled model call can't block ingestion, reorganization,
/// or search indefinitely (SEFS_EMBED_TIMEOUT_SECS, SPEC_FULL.md §5/§6).
pub fn embed_with_timeout(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
    timeout: Duration,
) -> SefsResult<Vec<Vec<f32>>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let _ = tx.send(embedder.embed(&refs));
    });
    rx.recv_timeout(timeout)
        .map_err(|_| SefsError::Embedding(format!("embedding call timed out after {}s", timeout.as_secs())))?
}

/// Cosine similarity between two vectors. Assumes both are L2-normalized, as
/// the Qwen3 embedder's output is.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_is_one_minus_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        assert!((cosine_distance(&a, &b)).abs() < 1e-6);
    }

    struct SlowEmbedder;
    impl Embedder for SlowEmbedder {
        fn embed(&self, texts: &[&str]) -> SefsResult<Vec<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn embed_with_timeout_returns_ok_within_deadline() {
        let embedder: Arc<dyn Embedder> = Arc::new(SlowEmbedder);
        let result = embed_with_timeout(embedder, vec!["hello".to_string()], Duration::from_secs(1));
        assert_eq!(result.unwrap(), vec![vec![1.0, 0.0]]);
    }

    #[test]
    fn embed_with_timeout_errors_past_deadline() {
        let embedder: Arc<dyn Embedder> = Arc::new(SlowEmbedder);
        let result = embed_with_timeout(embedder, vec!["hello".to_string()], Duration::from_millis(10));
        assert!(result.is_err());
    }
}
