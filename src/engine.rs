//! The similarity engine
//! Exhaustive scoring of every stored row against a query under two metrics
//!
//! One pass over the store fills both score arrays and tracks the best row
//! per metric. Rankings keep ascending row index order for exactly
//! equal scores, so the rank-1 entry always equals the best match.

use std::fmt;

use serde::Serialize;

use crate::error::SearchError;
use crate::store::VectorStore;
use crate::vector::{cosine_similarity, euclidean_distance, l2_norm};

/// Distance or similarity measure.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// L2 distance, lower is better.
    Euclidean,
    /// Cosine similarity, higher is better.
    Cosine,
}

impl Metric {
    pub fn order(self) -> Order {
        match self {
            Metric::Euclidean => Order::Ascending,
            Metric::Cosine => Order::Descending,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => write!(f, "euclidean"),
            Metric::Cosine => write!(f, "cosine"),
        }
    }
}

/// Direction in which scores improve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    /// True when `a` ranks strictly ahead of `b`.
    fn precedes(self, a: f32, b: f32) -> bool {
        match self {
            Order::Ascending => a < b,
            Order::Descending => a > b,
        }
    }
}

/// Best row under one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub index: usize,
    pub value: f32,
}

/// One entry of a ranking. `rank` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub rank: usize,
    pub index: usize,
    pub value: f32,
}

/// Per-row scores for one query.
#[derive(Debug)]
pub struct Scores {
    euclidean: Vec<f32>,
    cosine: Vec<f32>,
    best_euclidean: Option<usize>,
    best_cosine: Option<usize>,
}

impl Scores {
    /// Scores of every row under `metric`, indexed by row.
    pub fn values(&self, metric: Metric) -> &[f32] {
        match metric {
            Metric::Euclidean => &self.euclidean,
            Metric::Cosine => &self.cosine,
        }
    }

    /// Best row under `metric`.
    ///
    /// # Errors
    ///
    /// `SearchError::EmptyStore` when there were no rows to score.
    pub fn best(&self, metric: Metric) -> Result<BestMatch, SearchError> {
        let index = match metric {
            Metric::Euclidean => self.best_euclidean,
            Metric::Cosine => self.best_cosine,
        }
        .ok_or(SearchError::EmptyStore)?;

        Ok(BestMatch { index, value: self.values(metric)[index] })
    }

    /// The `k` best rows under `metric`, best first.
    pub fn ranked(&self, metric: Metric, k: usize) -> Vec<Ranked> {
        let values = self.values(metric);
        top_k(values, k, metric.order())
            .into_iter()
            .enumerate()
            .map(|(r, index)| Ranked { rank: r + 1, index, value: values[index] })
            .collect()
    }
}

/// Scores `query` against every row of `store`.
///
/// The query norm is computed once. Both metrics and both best-match
/// trackers are filled in the same pass.
///
/// # Errors
///
/// * `SearchError::DimensionMismatch` if `query.len()` differs from the store dimension
/// * `SearchError::NonFiniteScore` if any score is NaN or infinite
pub fn score(query: &[f32], store: &VectorStore) -> Result<Scores, SearchError> {
    if query.len() != store.dimension() {
        return Err(SearchError::DimensionMismatch {
            expected: store.dimension(),
            actual: query.len(),
        });
    }

    let query_norm = l2_norm(query);
    let rows = store.rows();

    let mut euclidean = Vec::with_capacity(rows);
    let mut cosine = Vec::with_capacity(rows);
    let mut best_euclidean: Option<usize> = None;
    let mut best_cosine: Option<usize> = None;

    for (i, row) in store.iter_rows().enumerate() {
        let euc = euclidean_distance(row, query) as f32;
        if !euc.is_finite() {
            return Err(SearchError::NonFiniteScore { metric: Metric::Euclidean, index: i });
        }
        if best_euclidean.is_none_or(|b| euc < euclidean[b]) {
            best_euclidean = Some(i);
        }
        euclidean.push(euc);

        let cos = cosine_similarity(row, query, l2_norm(row), query_norm) as f32;
        if !cos.is_finite() {
            return Err(SearchError::NonFiniteScore { metric: Metric::Cosine, index: i });
        }
        if best_cosine.is_none_or(|b| cos > cosine[b]) {
            best_cosine = Some(i);
        }
        cosine.push(cos);
    }

    Ok(Scores { euclidean, cosine, best_euclidean, best_cosine })
}

/// Indices of the `k` best scores in `order`, best first.
///
/// Equal scores keep ascending index order, matching a stable sort of all
/// indices truncated to `k`. Returns `min(k, scores.len())` indices.
pub fn top_k(scores: &[f32], k: usize, order: Order) -> Vec<usize> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }

    let mut kept: Vec<(usize, f32)> = Vec::with_capacity(k + 1);
    for (i, &s) in scores.iter().enumerate() {
        // a full list only admits rows that beat the current last place
        if kept.len() == k && !order.precedes(s, kept[k - 1].1) {
            continue;
        }
        let at = kept.partition_point(|&(_, held)| !order.precedes(s, held));
        kept.insert(at, (i, s));
        kept.truncate(k);
    }

    kept.into_iter().map(|(i, _)| i).collect()
}

#[cfg(test)]
mod engine_test {
    use super::*;

    fn store(rows: &[&[f32]]) -> VectorStore {
        let dim = rows.first().map_or(2, |r| r.len());
        let vectors = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let chunks = (0..rows.len()).map(|i| format!("chunk {}", i)).collect();
        VectorStore::new(vectors, dim, chunks).unwrap()
    }

    fn stable_sorted(scores: &[f32], order: Order) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..scores.len()).collect();
        match order {
            Order::Ascending => idx.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap()),
            Order::Descending => idx.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap()),
        }
        idx
    }

    // ========== Scoring Tests ==========

    #[test]
    fn test_score_three_rows() {
        let store = store(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
        let scores = score(&[1.0, 0.0], &store).unwrap();

        let best = scores.best(Metric::Euclidean).unwrap();
        assert_eq!(best.index, 0);
        assert_eq!(best.value, 0.0);

        let cos = scores.values(Metric::Cosine);
        assert!((cos[0] - 1.0).abs() < 1e-6);
        assert!(cos[1].abs() < 1e-6);
        assert!((cos[2] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        let ranked: Vec<usize> = scores.ranked(Metric::Cosine, 2).iter().map(|r| r.index).collect();
        assert_eq!(ranked, vec![0, 2]);

        let euc = scores.values(Metric::Euclidean);
        assert!((euc[1] - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert!((euc[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_dimension_mismatch() {
        let store = store(&[&[1.0, 0.0]]);
        let result = score(&[1.0, 0.0, 0.0], &store);
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_score_non_finite_query() {
        let store = store(&[&[1.0, 0.0]]);
        let result = score(&[f32::NAN, 0.0], &store);
        assert!(matches!(
            result,
            Err(SearchError::NonFiniteScore { metric: Metric::Euclidean, index: 0 })
        ));
    }

    #[test]
    fn test_score_overflowing_row() {
        let store = store(&[&[1.0, 0.0], &[f32::MAX, f32::MAX]]);
        // the distance fits in f64 but not in f32
        let result = score(&[-f32::MAX, -f32::MAX], &store);
        assert!(matches!(result, Err(SearchError::NonFiniteScore { index: 0, .. })));
    }

    #[test]
    fn test_score_zero_vector_row_is_finite() {
        let store = store(&[&[0.0, 0.0], &[1.0, 1.0]]);
        let scores = score(&[0.0, 0.0], &store).unwrap();
        assert_eq!(scores.values(Metric::Cosine), &[0.0, 0.0]);
        assert_eq!(scores.best(Metric::Euclidean).unwrap().index, 0);
    }

    #[test]
    fn test_empty_store_best_match_errors() {
        let empty = VectorStore::new(Vec::new(), 3, Vec::new()).unwrap();
        let scores = score(&[1.0, 2.0, 3.0], &empty).unwrap();

        assert!(matches!(scores.best(Metric::Euclidean), Err(SearchError::EmptyStore)));
        assert!(matches!(scores.best(Metric::Cosine), Err(SearchError::EmptyStore)));
        assert!(scores.ranked(Metric::Euclidean, 5).is_empty());
        assert!(scores.ranked(Metric::Cosine, 5).is_empty());
    }

    #[test]
    fn test_best_matches_rank_one() {
        let store = store(&[
            &[0.3, 0.9, -0.2],
            &[-0.5, 0.1, 0.8],
            &[0.7, 0.7, 0.0],
            &[0.3, 0.9, -0.2],
            &[2.0, -1.0, 0.5],
        ]);
        for query in [[0.3f32, 0.9, -0.2], [1.0, 0.0, 0.0], [-1.0, -1.0, 1.0]] {
            let scores = score(&query, &store).unwrap();
            for metric in [Metric::Euclidean, Metric::Cosine] {
                let best = scores.best(metric).unwrap();
                let first = scores.ranked(metric, 1)[0];
                assert_eq!(best.index, first.index, "{} for {:?}", metric, query);
                assert_eq!(best.value, first.value);
            }
        }
    }

    #[test]
    fn test_ties_prefer_lower_index() {
        // rows 0 and 2 are identical
        let store = store(&[&[1.0, 2.0], &[5.0, 5.0], &[1.0, 2.0]]);
        let scores = score(&[1.0, 2.0], &store).unwrap();

        assert_eq!(scores.best(Metric::Euclidean).unwrap().index, 0);
        assert_eq!(scores.best(Metric::Cosine).unwrap().index, 0);
        let ranked: Vec<usize> = scores.ranked(Metric::Euclidean, 3).iter().map(|r| r.index).collect();
        assert_eq!(ranked, vec![0, 2, 1]);
    }

    #[test]
    fn test_ranked_has_one_based_ranks() {
        let store = store(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
        let scores = score(&[1.0, 0.0], &store).unwrap();
        let ranked = scores.ranked(Metric::Euclidean, 3);
        let ranks: Vec<usize> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    // ========== Top-k Tests ==========

    #[test]
    fn test_top_k_length_is_min_of_k_and_n() {
        let scores: [f32; 3] = [0.5, 0.1, 0.9];
        assert_eq!(top_k(&scores, 2, Order::Ascending).len(), 2);
        assert_eq!(top_k(&scores, 3, Order::Ascending).len(), 3);
        assert_eq!(top_k(&scores, 30, Order::Descending).len(), 3);
        assert!(top_k(&scores, 0, Order::Descending).is_empty());
        assert!(top_k(&[], 5, Order::Ascending).is_empty());
    }

    #[test]
    fn test_top_k_orders() {
        let scores: [f32; 4] = [0.5, 0.1, 0.9, 0.3];
        assert_eq!(top_k(&scores, 3, Order::Ascending), vec![1, 3, 0]);
        assert_eq!(top_k(&scores, 3, Order::Descending), vec![2, 0, 3]);
    }

    #[test]
    fn test_top_k_all_equal_keeps_index_order() {
        let scores = [0.25f32; 6];
        assert_eq!(top_k(&scores, 4, Order::Ascending), vec![0, 1, 2, 3]);
        assert_eq!(top_k(&scores, 4, Order::Descending), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_top_k_matches_stable_sort() {
        // LCG with many repeated values to exercise ties
        let mut state: u64 = 42;
        let scores: Vec<f32> = (0..500)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) % 40) as f32 / 4.0
            })
            .collect();

        for order in [Order::Ascending, Order::Descending] {
            let full = stable_sorted(&scores, order);
            for k in [1, 5, 17, 30, 499, 500, 800] {
                let expected: Vec<usize> = full.iter().copied().take(k).collect();
                assert_eq!(top_k(&scores, k, order), expected, "{:?} k={}", order, k);
            }
        }
    }

    #[test]
    fn test_metric_orders() {
        assert_eq!(Metric::Euclidean.order(), Order::Ascending);
        assert_eq!(Metric::Cosine.order(), Order::Descending);
    }
}
