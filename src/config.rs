use std::path::PathBuf;

/// Extensions the Ingestor is willing to read. Anything else is a silent skip.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "pdf"];

/// Check whether a file extension (without leading dot) is eligible for ingestion.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Name of the reserved directory under the monitored root holding the Store
/// database and the vector index. Never watched, never clustered, never moved.
pub const METADATA_DIR: &str = ".sefs_metadata";

/// Database sidecar suffixes the Monitor ignores, alongside the metadata dir itself.
pub const IGNORED_SUFFIXES: &[&str] = &[".db-journal", ".db-wal", ".db-shm"];

/// Minimum non-whitespace characters a document must yield to be ingested.
pub const MIN_DOCUMENT_CHARS: usize = 10;

/// Minimum characters a chunk window must have to be admitted into the ChunkIndex.
pub const MIN_CHUNK_CHARS: usize = 50;

pub const MAX_INGEST_RETRIES: u32 = 3;
pub const INGEST_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct SefsConfig {
    pub monitor_root: PathBuf,
    pub listen_addr: String,
    pub model_name: String,
    pub cluster_eps: f32,
    pub cluster_min_samples: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k_chunks: usize,
    pub worker_pool_size: usize,
    pub debounce_ms: u64,
    pub settle_ms: u64,
    pub gemini_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    pub embed_timeout_secs: u64,
}

impl SefsConfig {
    pub fn from_env() -> Self {
        let monitor_root = std::env::var("SEFS_MONITOR_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./sefs-root"));

        let listen_addr = std::env::var("SEFS_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string());

        let model_name =
            std::env::var("SEFS_MODEL_NAME").unwrap_or_else(|_| "all-MiniLM-L6-v2".to_string());

        let cluster_eps = std::env::var("SEFS_CLUSTER_EPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.6);

        let cluster_min_samples = std::env::var("SEFS_CLUSTER_MIN_SAMPLES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let chunk_size = std::env::var("SEFS_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(400);

        let chunk_overlap = std::env::var("SEFS_CHUNK_OVERLAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        let top_k_chunks = std::env::var("SEFS_TOP_K_CHUNKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let worker_pool_size = std::env::var("SEFS_WORKER_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let debounce_ms = std::env::var("SEFS_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);

        let settle_ms = std::env::var("SEFS_SETTLE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let llm_timeout_secs = std::env::var("SEFS_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let embed_timeout_secs = std::env::var("SEFS_EMBED_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            monitor_root,
            listen_addr,
            model_name,
            cluster_eps,
            cluster_min_samples,
            chunk_size,
            chunk_overlap,
            top_k_chunks,
            worker_pool_size,
            debounce_ms,
            settle_ms,
            gemini_api_key,
            llm_timeout_secs,
            embed_timeout_secs,
        }
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.monitor_root.join(METADATA_DIR)
    }

    pub fn store_path(&self) -> PathBuf {
        self.metadata_dir().join("embeddings.db")
    }

    pub fn chroma_dir(&self) -> PathBuf {
        self.metadata_dir().join("chroma_db")
    }
}
