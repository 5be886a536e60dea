//! Retrieval-augmented question answering over the ChunkIndex.
//!
//! Grounded on `examples/original_source/backend/rag_engine.py::ask`/
//! `generate_answer`: retrieve top-k chunks, build a fixed prompt template,
//! call the external LLM, and return a structured `API_KEY_MISSING` payload
//! when no credential is configured rather than raising to the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::chunk_index::{ChunkHit, ChunkIndex};
use crate::config::SefsConfig;

const NO_DOCUMENTS_ANSWER: &str =
    "I don't have any relevant documents to answer this question. Please add some files to the monitored folder.";
const API_KEY_MISSING: &str = "API_KEY_MISSING";

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub filename: String,
    pub path: String,
    pub similarity: f32,
    pub topic: String,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub query: String,
    pub answer: String,
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct QaPipeline {
    client: reqwest::Client,
    api_key: Option<String>,
    llm_timeout: Duration,
}

impl QaPipeline {
    pub fn new(config: &SefsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.gemini_api_key.clone(),
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    pub async fn ask(
        &self,
        chunk_index: &Arc<ChunkIndex>,
        query: &str,
        cluster_id: Option<i64>,
        top_k: usize,
    ) -> AskResponse {
        let hits = match chunk_index.search(query, top_k, cluster_id) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("chunk search failed during ask: {e}");
                Vec::new()
            }
        };

        if hits.is_empty() {
            return AskResponse {
                query: query.to_string(),
                answer: NO_DOCUMENTS_ANSWER.to_string(),
                sources: Vec::new(),
                error: None,
            };
        }

        let Some(api_key) = self.api_key.clone() else {
            return AskResponse {
                query: query.to_string(),
                answer: String::new(),
                sources: Vec::new(),
                error: Some(API_KEY_MISSING.to_string()),
            };
        };

        let prompt = build_prompt(query, &hits);
        let sources = hits.iter().map(to_source).collect();

        match self.complete(&api_key, &prompt).await {
            Ok(answer) => AskResponse {
                query: query.to_string(),
                answer,
                sources,
                error: None,
            },
            Err(e) => {
                tracing::error!("LLM completion failed: {e}");
                AskResponse {
                    query: query.to_string(),
                    answer: String::new(),
                    sources,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn complete(&self, api_key: &str, prompt: &str) -> anyhow::Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key={api_key}"
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = tokio::time::timeout(self.llm_timeout, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| anyhow::anyhow!("LLM request timed out"))??;

        let status = response.status();
        let payload: serde_json::Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("LLM request failed with status {status}: {payload}");
        }

        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("unexpected LLM response shape"))
    }
}

fn build_prompt(query: &str, hits: &[ChunkHit]) -> String {
    let mut context = String::new();
    for (i, hit) in hits.iter().enumerate() {
        context.push_str(&format!("[Source {}: {}]\n{}\n\n", i + 1, hit.filename, hit.text));
    }

    format!(
        "Answer the following question based ONLY on the provided context.\n\
         If the answer cannot be found in the context, say\n\
         \"I cannot answer this based on the available documents.\"\n\n\
         Context:\n{context}\n\
         Question: {query}\n\n\
         Answer:"
    )
}

fn to_source(hit: &ChunkHit) -> Source {
    let preview: String = hit.text.chars().take(150).collect::<String>() + "...";
    Source {
        filename: hit.filename.clone(),
        path: hit.filepath.clone(),
        similarity: hit.similarity,
        topic: hit.topic_label.clone(),
        preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hit() -> ChunkHit {
        ChunkHit {
            filepath: "/root/a.txt".to_string(),
            filename: "a.txt".to_string(),
            chunk_index: 0,
            cluster_id: 0,
            topic_label: "Quantum".to_string(),
            text: "quantum tunneling is a phenomenon".to_string(),
            similarity: 0.9,
        }
    }

    #[test]
    fn prompt_includes_numbered_sources_and_question() {
        let hits = vec![sample_hit()];
        let prompt = build_prompt("what is tunneling?", &hits);
        assert!(prompt.contains("[Source 1: a.txt]"));
        assert!(prompt.contains("Question: what is tunneling?"));
        assert!(prompt.contains("I cannot answer this based on the available documents."));
    }

    #[test]
    fn source_preview_is_truncated_to_150_chars_plus_ellipsis() {
        let mut hit = sample_hit();
        hit.text = "x".repeat(400);
        let source = to_source(&hit);
        assert_eq!(source.preview.chars().count(), 153);
        assert!(source.preview.ends_with("..."));
    }
}
