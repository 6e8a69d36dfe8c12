//! The query service
//! Validates a prompt, embeds it, scores it against the store and
//! assembles the response
//!
//! [`SearchContext`] holds everything a request needs: the read-only store
//! and the embedder. It is built once, in a fixed order (load store, verify
//! shapes, initialize embedder, verify policy), and shared by reference.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{clamp_top_k, top_k_from_json};
use crate::embed::{Embedder, EmbeddingPolicy};
use crate::engine::{self, Metric};
use crate::error::{SearchError, StoreError};
use crate::store::VectorStore;

/// Body of a search request.
///
/// Both fields are loosely typed so browser clients can send numbers as
/// strings; see [`top_k_from_json`] for the coercion rules.
#[derive(Deserialize, Debug, Default)]
pub struct SearchRequest {
    #[serde(default)]
    pub prompt: Value,
    #[serde(default)]
    pub top_k: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EuclideanMatch {
    pub index: usize,
    pub distance: f32,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CosineMatch {
    pub index: usize,
    pub score: f32,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RankedEuclidean {
    pub rank: usize,
    pub index: usize,
    pub distance: f32,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RankedCosine {
    pub rank: usize,
    pub index: usize,
    pub score: f32,
    pub text: String,
}

/// Result of one search.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub embedding_dim: usize,
    pub prompt: String,
    pub closest_euclidean: EuclideanMatch,
    pub closest_cosine: CosineMatch,
    pub top_euclidean: Vec<RankedEuclidean>,
    pub top_cosine: Vec<RankedCosine>,
}

/// Process-wide search state: the loaded store and the query embedder.
pub struct SearchContext {
    store: VectorStore,
    embedder: Box<dyn Embedder>,
}

impl SearchContext {
    /// Pairs a loaded store with an embedder.
    ///
    /// When the store carries a manifest, its dimension must match the
    /// matrix and its policy must equal the embedder's. Without a manifest
    /// the active policy is trusted.
    ///
    /// # Errors
    ///
    /// * `StoreError::Format` if the manifest dimension disagrees with the matrix
    /// * `StoreError::PolicyMismatch` if the store was built under another policy
    pub fn new(store: VectorStore, embedder: Box<dyn Embedder>) -> Result<Self, StoreError> {
        match store.manifest() {
            Some(manifest) => {
                if manifest.dimension != store.dimension() {
                    return Err(StoreError::Format(format!(
                        "manifest dimension {} does not match embeddings dim {}",
                        manifest.dimension,
                        store.dimension()
                    )));
                }
                if &manifest.policy != embedder.policy() {
                    return Err(StoreError::PolicyMismatch {
                        stored: manifest.policy.clone(),
                        active: embedder.policy().clone(),
                    });
                }
            }
            None => {
                tracing::warn!(
                    policy = %embedder.policy(),
                    "Store has no manifest, assuming it matches the active embedding policy"
                );
            }
        }

        Ok(SearchContext { store, embedder })
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn policy(&self) -> &EmbeddingPolicy {
        self.embedder.policy()
    }

    /// Handles a loosely-typed request body.
    pub fn search_request(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let prompt = prompt_from_json(&request.prompt)?;
        let top_k = top_k_from_json(request.top_k.as_ref());
        self.search(&prompt, top_k)
    }

    /// Searches the store for `prompt`.
    ///
    /// `top_k` is clamped to `[1, 30]`. The prompt is trimmed, and the
    /// trimmed text is echoed back.
    ///
    /// # Errors
    ///
    /// * `SearchError::InvalidQuery` if the prompt is empty after trimming
    /// * `SearchError::EmptyStore` if the store has no rows
    /// * `SearchError::Embedding` if the embedder fails
    /// * `SearchError::DimensionMismatch` if the embedder's output length differs from the store
    /// * `SearchError::NonFiniteScore` if scoring produced NaN or infinity
    pub fn search(&self, prompt: &str, top_k: usize) -> Result<SearchResponse, SearchError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SearchError::InvalidQuery("Empty prompt".to_string()));
        }
        let top_k = clamp_top_k(top_k as f64);

        if self.store.is_empty() {
            return Err(SearchError::EmptyStore);
        }

        let start = Instant::now();
        let query = self.embedder.embed(prompt)?;
        let embed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if query.len() != self.store.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: query.len(),
            });
        }

        let start = Instant::now();
        let scores = engine::score(&query, &self.store)?;
        let best_euc = scores.best(Metric::Euclidean)?;
        let best_cos = scores.best(Metric::Cosine)?;
        let top_euc = scores.ranked(Metric::Euclidean, top_k);
        let top_cos = scores.ranked(Metric::Cosine, top_k);
        let score_ms = start.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            prompt_len = prompt.len(),
            top_k,
            rows = self.store.rows(),
            embed_ms,
            score_ms,
            "Search completed"
        );

        let text = |index: usize| self.store.chunk(index).to_string();

        Ok(SearchResponse {
            embedding_dim: self.store.dimension(),
            prompt: prompt.to_string(),
            closest_euclidean: EuclideanMatch {
                index: best_euc.index,
                distance: best_euc.value,
                text: text(best_euc.index),
            },
            closest_cosine: CosineMatch {
                index: best_cos.index,
                score: best_cos.value,
                text: text(best_cos.index),
            },
            top_euclidean: top_euc
                .into_iter()
                .map(|r| RankedEuclidean { rank: r.rank, index: r.index, distance: r.value, text: text(r.index) })
                .collect(),
            top_cosine: top_cos
                .into_iter()
                .map(|r| RankedCosine { rank: r.rank, index: r.index, score: r.value, text: text(r.index) })
                .collect(),
        })
    }
}

/// Coerces the `prompt` field to text. Null or missing becomes empty.
/// Arrays join their elements with commas, the way browsers stringify them.
fn prompt_from_json(value: &Value) -> Result<String, SearchError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => {
            let parts = items.iter().map(prompt_from_json).collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(","))
        }
        Value::Object(_) => Err(SearchError::InvalidQuery("prompt must be a string".to_string())),
    }
}
