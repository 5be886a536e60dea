//! `/graph`, `/stats`, `/clusters`, `/move-file`, `/search`, `/ask`,
//! `/open-file` (§6).
//!
//! Grounded on `examples/original_source/backend/main.py`'s FastAPI handlers
//! for exact response shapes, and `vyotiq-backend/src/routes/files.rs` /
//! `workspace.rs` for the axum handler idiom: `State<AppState>` extraction,
//! a `tracing` span per request, a consistent `{success, ...}` JSON
//! envelope. Bad input here (missing file, malformed `target_cluster`) is
//! the spec's deliberate exception: HTTP 200 with `{success:false,error}`,
//! not a `SefsError`.

use std::path::Path;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clusterer::NOISE_CLUSTER_ID;
use crate::state::AppState;

/// Rejects a client-supplied filepath that canonicalizes outside the
/// monitored root, guarding `/move-file` and `/open-file` against
/// `../`-style traversal. Uses `dunce` rather than
/// `std::fs::canonicalize` so the guard doesn't choke on Windows'
/// `\\?\` UNC prefix in the rare case this ever runs there.
fn within_monitor_root(root: &Path, filepath: &str) -> bool {
    let Ok(canon) = dunce::canonicalize(filepath) else {
        return false;
    };
    let Ok(canon_root) = dunce::canonicalize(root) else {
        return false;
    };
    canon.starts_with(canon_root)
}

#[derive(Serialize)]
pub struct GraphResponse {
    nodes: Vec<Value>,
    links: Vec<Value>,
    entropy: Value,
}

pub async fn graph(State(state): State<AppState>) -> Json<GraphResponse> {
    let snapshot = state.engine.snapshot();
    let entropy = state.engine.entropy_metrics();

    let mut nodes = vec![json!({"id": "ROOT", "type": "root", "entropy": entropy.entropy})];
    let mut links = Vec::new();

    let mut seen_clusters = std::collections::HashSet::new();
    for (_, cid, label) in &snapshot {
        if *cid == NOISE_CLUSTER_ID {
            continue;
        }
        let cluster_node_id = format!("{label}_{cid}");
        if seen_clusters.insert(cluster_node_id.clone()) {
            nodes.push(json!({"id": cluster_node_id, "type": "cluster", "label": label, "cluster_id": cid}));
            links.push(json!({"source": cluster_node_id, "target": "ROOT"}));
        }
    }

    for (path, cid, label) in &snapshot {
        let filename = Path::new(path).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.clone());
        nodes.push(json!({"id": path, "type": "file", "label": filename}));
        if *cid == NOISE_CLUSTER_ID {
            links.push(json!({"source": path, "target": "ROOT"}));
        } else {
            links.push(json!({"source": path, "target": format!("{label}_{cid}")}));
        }
    }

    Json(GraphResponse {
        nodes,
        links,
        entropy: json!({"entropy": entropy.entropy, "cohesion": entropy.cohesion, "separation": entropy.separation}),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    match state.engine.stats() {
        Ok(s) => Json(json!({
            "total_files": s.total_files,
            "total_clusters": s.total_clusters,
            "avg_content_length": s.avg_content_length,
            "cached_files": s.cached_files,
            "active_clusters": s.active_clusters,
            "entropy_score": s.entropy_score,
            "cohesion": s.cohesion,
            "chunk_count": s.chunk_count,
        })),
        Err(e) => {
            tracing::error!("stats failed: {e}");
            Json(json!({"success": false, "error": e.to_string()}))
        }
    }
}

#[derive(Serialize)]
struct ClusterView {
    id: i64,
    topic: String,
    files: Vec<String>,
}

pub async fn clusters(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.engine.snapshot();
    let mut grouped: std::collections::HashMap<(i64, String), Vec<String>> = std::collections::HashMap::new();
    for (path, cid, label) in snapshot {
        let filename = Path::new(&path).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or(path);
        grouped.entry((cid, label)).or_default().push(filename);
    }

    let clusters: Vec<ClusterView> = grouped
        .into_iter()
        .map(|((id, topic), files)| ClusterView { id, topic, files })
        .collect();

    Json(json!({"clusters": clusters}))
}

#[derive(Deserialize)]
pub struct MoveFileRequest {
    filepath: String,
    target_cluster: String,
}

pub async fn move_file(State(state): State<AppState>, Json(req): Json<MoveFileRequest>) -> Json<Value> {
    if !within_monitor_root(state.engine.monitor_root(), &req.filepath) {
        return Json(json!({"success": false, "error": "filepath is outside the monitored root"}));
    }

    match state.engine.move_file_to_cluster(&req.filepath, &req.target_cluster) {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => {
            tracing::warn!("move-file failed for {}: {e}", req.filepath);
            Json(json!({"success": false, "error": e.to_string()}))
        }
    }
}

#[derive(Deserialize)]
pub struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[derive(Serialize)]
struct SearchResult {
    filepath: String,
    filename: String,
    similarity: f32,
    preview: String,
}

pub async fn search(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> Json<Value> {
    if req.query.trim().is_empty() {
        return Json(json!({"success": false, "error": "query must not be empty"}));
    }

    match state.engine.search(&req.query, req.top_k) {
        Ok(hits) => {
            let results: Vec<SearchResult> = hits
                .into_iter()
                .map(|(path, similarity, content)| {
                    let filename = Path::new(&path).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.clone());
                    let preview: String = content.chars().take(200).collect::<String>() + "...";
                    SearchResult { filepath: path, filename, similarity, preview }
                })
                .collect();
            Json(json!({"success": true, "results": results}))
        }
        Err(e) => {
            tracing::error!("search failed: {e}");
            Json(json!({"success": false, "error": e.to_string()}))
        }
    }
}

#[derive(Deserialize)]
pub struct AskRequest {
    query: String,
    cluster_id: Option<i64>,
}

pub async fn ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> Json<Value> {
    if req.query.trim().is_empty() {
        return Json(json!({"error": "query must not be empty"}));
    }
    let response = state
        .qa
        .ask(state.engine.chunk_index(), &req.query, req.cluster_id, state.config.top_k_chunks)
        .await;
    Json(serde_json::to_value(response).unwrap_or_else(|_| json!({"error": "internal serialization error"})))
}

#[derive(Deserialize)]
pub struct OpenFileRequest {
    filepath: String,
}

pub async fn open_file(State(state): State<AppState>, Json(req): Json<OpenFileRequest>) -> Json<Value> {
    if !within_monitor_root(state.engine.monitor_root(), &req.filepath) {
        return Json(json!({"success": false, "error": "filepath is outside the monitored root"}));
    }
    if !Path::new(&req.filepath).exists() {
        return Json(json!({"success": false, "error": "file not found"}));
    }

    let result = if cfg!(target_os = "windows") {
        std::process::Command::new("cmd").args(["/C", "start", "", &req.filepath]).status()
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(&req.filepath).status()
    } else {
        std::process::Command::new("xdg-open").arg(&req.filepath).status()
    };

    match result {
        Ok(status) if status.success() => Json(json!({"success": true})),
        Ok(status) => Json(json!({"success": false, "error": format!("exit code {:?}", status.code())})),
        Err(e) => Json(json!({"success": false, "error": e.to_string()})),
    }
}
