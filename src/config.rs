//! Defaults and request-parameter normalization.
//!
//! Compile-time constants live here; runtime settings come from the CLI
//! (see `main.rs`), which falls back to these values.

use serde_json::Value;

/// Number of results returned when the caller does not ask for a count.
pub const DEFAULT_TOP_K: usize = 5;

/// Smallest accepted result count.
pub const MIN_TOP_K: usize = 1;

/// Largest accepted result count.
pub const MAX_TOP_K: usize = 30;

/// Added to the norm product in cosine similarity so all-zero vectors
/// score 0 instead of dividing by zero.
pub const COSINE_EPSILON: f64 = 1e-10;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Directory holding the embedding matrix, chunk list and manifest.
pub const DEFAULT_DATA_DIR: &str = "semantic_gooaq_minilm";

pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Model used to build the shipped store.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Largest accepted JSON request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Batch size for offline store construction.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Clamps a numeric result count into `[MIN_TOP_K, MAX_TOP_K]`.
///
/// Non-finite input falls back to [`DEFAULT_TOP_K`]. Fractions are
/// truncated toward zero after clamping.
pub fn clamp_top_k(requested: f64) -> usize {
    if !requested.is_finite() {
        return DEFAULT_TOP_K;
    }
    requested.clamp(MIN_TOP_K as f64, MAX_TOP_K as f64).trunc() as usize
}

/// Interprets the loosely-typed `top_k` field of a search request.
///
/// Accepts numbers, numeric strings and booleans the same way a JSON
/// front-end would coerce them. Missing, null or non-numeric values yield
/// [`DEFAULT_TOP_K`].
pub fn top_k_from_json(value: Option<&Value>) -> usize {
    let numeric = match value {
        None | Some(Value::Null) => return DEFAULT_TOP_K,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        Some(Value::Array(_)) | Some(Value::Object(_)) => None,
    };

    match numeric {
        Some(n) => clamp_top_k(n),
        None => DEFAULT_TOP_K,
    }
}
