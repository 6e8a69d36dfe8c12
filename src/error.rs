//! Error types for loading, embedding and searching.
//!
//! [`StoreError`] is fatal at startup. [`EmbedError`] and [`SearchError`]
//! are scoped to a single request and never affect the loaded store.

use std::io;

use thiserror::Error;

use crate::embed::EmbeddingPolicy;
use crate::engine::Metric;

/// Malformed or inconsistent vector store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Mismatch: chunks={chunks} but embeddings rows={rows}")]
    ShapeMismatch { chunks: usize, rows: usize },

    #[error("Embedding policy mismatch: store was built with {stored}, active embedder uses {active}")]
    PolicyMismatch {
        stored: EmbeddingPolicy,
        active: EmbeddingPolicy,
    },
}

/// Failure inside the external text-to-vector model.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("Invalid model config: {0}")]
    Config(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Model download failed: {0}")]
    Hub(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Embedder produced a non-finite value at position {position}")]
    NonFinite { position: usize },
}

/// Request-level search failure.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("{0}")]
    InvalidQuery(String),

    #[error("Prompt dim {actual} does not match embeddings dim {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding store is empty")]
    EmptyStore,

    #[error("Non-finite {metric} score at row {index}")]
    NonFiniteScore { metric: Metric, index: usize },

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// True when the request itself was bad (4xx); false for internal
    /// failures (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, SearchError::InvalidQuery(_))
    }
}
