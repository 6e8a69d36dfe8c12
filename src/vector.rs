//! This is the vector math module
//! Provide L2 norm, dot product, Euclidean distance and cosine similarity
//!
//! Inputs are `f32`; accumulation happens in `f64` so long vectors keep
//! their precision.

use crate::config::COSINE_EPSILON;

/// L2 Norm
/// ||vec|| = sqrt(sum(vec[i]^2))
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector.iter()
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Dot Product
/// dot_prod = sum(a[i] * b[i]) for i = 0..a.len()
/// Callers guarantee equal lengths; extra elements of the longer side are ignored.
pub fn dot_product(left: &[f32], right: &[f32]) -> f64 {
    debug_assert_eq!(left.len(), right.len());

    left.iter()
        .zip(right.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

/// Euclidean Distance
/// dist = sqrt(sum((a[i] - b[i])^2))
pub fn euclidean_distance(left: &[f32], right: &[f32]) -> f64 {
    debug_assert_eq!(left.len(), right.len());

    left.iter()
        .zip(right.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Cosine Similarity
/// cos = dot(a, b) / (||a|| * ||b|| + eps)
///
/// Norms are passed in so a query norm can be computed once and reused
/// across every row.
pub fn cosine_similarity(left: &[f32], right: &[f32], left_norm: f64, right_norm: f64) -> f64 {
    dot_product(left, right) / (left_norm * right_norm + COSINE_EPSILON)
}
