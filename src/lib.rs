//! # semsearch - Exhaustive Semantic Search
//!
//! semsearch embeds a query with the same sentence encoder used to build a
//! precomputed store of text chunks, then scores every stored vector under
//! Euclidean distance and cosine similarity and returns the nearest chunks
//! for both.
//!
//! The store (an `.npy` matrix plus a JSON list of chunks) is loaded once
//! and never mutated. Search is brute force: O(N·D) per query.
//!
//! ## Example
//!
//! ```
//! use semsearch::engine::{score, Metric};
//! use semsearch::VectorStore;
//!
//! let store = VectorStore::new(
//!     vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
//!     2,
//!     vec!["a".to_string(), "b".to_string(), "c".to_string()],
//! ).unwrap();
//!
//! let scores = score(&[1.0, 0.0], &store).unwrap();
//! assert_eq!(scores.best(Metric::Euclidean).unwrap().index, 0);
//!
//! let top: Vec<usize> = scores.ranked(Metric::Cosine, 2).iter().map(|r| r.index).collect();
//! assert_eq!(top, vec![0, 2]);
//! ```

pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod server;
pub mod service;
pub mod store;
pub mod vector;

pub use embed::{BertEmbedder, Embedder, EmbeddingPolicy, Pooling};
pub use error::{EmbedError, SearchError, StoreError};
pub use service::{SearchContext, SearchRequest, SearchResponse};
pub use store::VectorStore;
