use std::fs;
use std::time::Instant;

use semsearch::config::{CHUNKS_FILE, EMBEDDINGS_FILE, MANIFEST_FILE};
use semsearch::store::encode_npy;
use semsearch::{
    EmbedError, Embedder, EmbeddingPolicy, Pooling, SearchContext, SearchError, StoreError, VectorStore,
};
use tempfile::TempDir;

fn random_vector(dim: usize, seed: u64) -> Vec<f32> {
    // Simple LCG pseudo-random generator (no external dep needed)
    let mut state = seed;
    (0..dim)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            // Map to [-1.0, 1.0]
            ((state >> 33) as f32) / (u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

fn policy() -> EmbeddingPolicy {
    EmbeddingPolicy {
        model_id: "lcg".to_string(),
        pooling: Pooling::Mean,
        normalize: false,
    }
}

/// Embeds "seed:<n>" as the LCG vector for seed n
struct SeedEmbedder {
    policy: EmbeddingPolicy,
    dim: usize,
}

impl Embedder for SeedEmbedder {
    fn policy(&self) -> &EmbeddingPolicy {
        &self.policy
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let seed = text
            .strip_prefix("seed:")
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| EmbedError::Tokenizer(format!("expected 'seed:<n>', got '{}'", text)))?;
        Ok(random_vector(self.dim, seed))
    }
}

/// Reference ranking: full stable sort of every row
fn reference_rankings(vectors: &[Vec<f32>], query: &[f32], k: usize) -> (Vec<usize>, Vec<usize>) {
    let qn: f64 = query.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt();
    let mut euc = Vec::new();
    let mut cos = Vec::new();
    for v in vectors {
        let d: f64 = v.iter().zip(query).map(|(&a, &b)| (a as f64 - b as f64).powi(2)).sum::<f64>().sqrt();
        let dot: f64 = v.iter().zip(query).map(|(&a, &b)| a as f64 * b as f64).sum();
        let vn: f64 = v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt();
        euc.push(d as f32);
        cos.push((dot / (vn * qn + 1e-10)) as f32);
    }

    let mut by_euc: Vec<usize> = (0..vectors.len()).collect();
    by_euc.sort_by(|&a, &b| euc[a].partial_cmp(&euc[b]).unwrap());
    by_euc.truncate(k);

    let mut by_cos: Vec<usize> = (0..vectors.len()).collect();
    by_cos.sort_by(|&a, &b| cos[b].partial_cmp(&cos[a]).unwrap());
    by_cos.truncate(k);

    (by_euc, by_cos)
}

#[test]
fn test_write_load_and_search_20k_vectors() {
    let dim = 64;
    let num_vectors = 20_000;
    let num_searches = 20;

    println!("\n=== Store E2E Test ===");
    println!("Vectors: {}, Dimensions: {}, Searches: {}\n", num_vectors, dim, num_searches);

    // Phase 1: Build a store on disk
    let start = Instant::now();
    let rows: Vec<Vec<f32>> = (0..num_vectors).map(|i| random_vector(dim, i as u64)).collect();
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    let chunks: Vec<String> = (0..num_vectors).map(|i| format!("chunk number {}", i)).collect();
    let temp_dir = TempDir::new().unwrap();
    VectorStore::new(flat, dim, chunks).unwrap().write(temp_dir.path(), &policy()).unwrap();
    println!("Phase 1 - Build and write: {:.3}s", start.elapsed().as_secs_f64());

    // Phase 2: Load it back
    let start = Instant::now();
    let store = VectorStore::load(temp_dir.path()).unwrap();
    assert_eq!(store.rows(), num_vectors);
    assert_eq!(store.dimension(), dim);
    assert_eq!(store.manifest().unwrap().policy, policy());
    println!("Phase 2 - Load from disk: {:.3}s", start.elapsed().as_secs_f64());

    let ctx = SearchContext::new(store, Box::new(SeedEmbedder { policy: policy(), dim })).unwrap();

    // Phase 3: A stored row finds itself
    let response = ctx.search("seed:1234", 5).unwrap();
    assert_eq!(response.closest_euclidean.index, 1234);
    assert_eq!(response.closest_euclidean.distance, 0.0);
    assert_eq!(response.closest_euclidean.text, "chunk number 1234");
    assert_eq!(response.closest_cosine.index, 1234);
    assert!((response.closest_cosine.score - 1.0).abs() < 1e-5);

    // Phase 4: Random queries agree with a full sort
    let start = Instant::now();
    for i in 0..num_searches {
        let seed = (num_vectors + i) as u64;
        let response = ctx.search(&format!("seed:{}", seed), 10).unwrap();
        let (ref_euc, ref_cos) = reference_rankings(&rows, &random_vector(dim, seed), 10);

        let got_euc: Vec<usize> = response.top_euclidean.iter().map(|r| r.index).collect();
        let got_cos: Vec<usize> = response.top_cosine.iter().map(|r| r.index).collect();
        assert_eq!(got_euc, ref_euc);
        assert_eq!(got_cos, ref_cos);

        for w in response.top_euclidean.windows(2) {
            assert!(w[0].distance <= w[1].distance, "Euclidean results not ascending");
        }
        for w in response.top_cosine.windows(2) {
            assert!(w[0].score >= w[1].score, "Cosine results not descending");
        }
        assert_eq!(response.closest_euclidean.index, got_euc[0]);
        assert_eq!(response.closest_cosine.index, got_cos[0]);
    }
    let search_time = start.elapsed();
    println!("Phase 4 - {} searches: {:.3}s (avg {:.3}ms/search)\n",
        num_searches, search_time.as_secs_f64(),
        search_time.as_secs_f64() / num_searches as f64 * 1000.0);
}

#[test]
fn test_load_rejects_misaligned_chunks() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(EMBEDDINGS_FILE), encode_npy(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0])).unwrap();
    fs::write(temp_dir.path().join(CHUNKS_FILE), r#"["a", "b"]"#).unwrap();

    let result = VectorStore::load(temp_dir.path());
    assert!(matches!(result, Err(StoreError::ShapeMismatch { chunks: 2, rows: 3 })));
}

#[test]
fn test_load_rejects_garbage_matrix() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(EMBEDDINGS_FILE), b"definitely not numpy").unwrap();
    fs::write(temp_dir.path().join(CHUNKS_FILE), r#"["a"]"#).unwrap();

    let result = VectorStore::load(temp_dir.path());
    assert!(matches!(result, Err(StoreError::Format(_))));
}

#[test]
fn test_policy_mismatch_blocks_context() {
    let temp_dir = TempDir::new().unwrap();
    let store = VectorStore::new(vec![1.0, 0.0], 2, vec!["a".to_string()]).unwrap();
    let mut built_with = policy();
    built_with.pooling = Pooling::Cls;
    store.write(temp_dir.path(), &built_with).unwrap();

    let loaded = VectorStore::load(temp_dir.path()).unwrap();
    let result = SearchContext::new(loaded, Box::new(SeedEmbedder { policy: policy(), dim: 2 }));
    assert!(matches!(result, Err(StoreError::PolicyMismatch { .. })));

    // same files without the manifest are accepted
    fs::remove_file(temp_dir.path().join(MANIFEST_FILE)).unwrap();
    let loaded = VectorStore::load(temp_dir.path()).unwrap();
    let ctx = SearchContext::new(loaded, Box::new(SeedEmbedder { policy: policy(), dim: 2 })).unwrap();
    assert!(matches!(ctx.search("", 5), Err(SearchError::InvalidQuery(_))));
}

#[test]
fn test_empty_store_loads_and_reports() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(EMBEDDINGS_FILE), encode_npy(0, 8, &[])).unwrap();
    fs::write(temp_dir.path().join(CHUNKS_FILE), "[]").unwrap();

    let store = VectorStore::load(temp_dir.path()).unwrap();
    let ctx = SearchContext::new(store, Box::new(SeedEmbedder { policy: policy(), dim: 8 })).unwrap();
    assert!(matches!(ctx.search("seed:1", 5), Err(SearchError::EmptyStore)));
}
