//! Vector primitives: cosine similarity, running means, seeded k-means,
//! and assignment entropy.
//!
//! Everything here is pure; callers own the policy (thresholds, scope,
//! persistence). K-means is deterministic by construction so the rebalance
//! job produces identical partitions across runs.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::hash::Hash;

/// Fixed RNG seed for k-means initialization.
const KMEANS_SEED: u64 = 42;

/// Maximum Lloyd iterations before giving up on convergence.
const KMEANS_MAX_ITER: usize = 20;

/// Cosine similarity between two vectors; 0.0 when either norm is zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

/// Euclidean (L2) norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Incremental mean update: given the mean over `old_n` samples and one new
/// vector, return the mean over `old_n + 1` samples.
pub fn running_mean(old: &[f32], old_n: i64, new: &[f32]) -> Vec<f32> {
    let denom = (old_n + 1).max(1) as f32;
    old.iter()
        .zip(new.iter())
        .map(|(o, x)| (o * old_n as f32 + x) / denom)
        .collect()
}

/// Arithmetic mean of a set of vectors. Returns `None` when empty.
pub fn mean(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut acc = vec![0.0f32; first.len()];
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += x;
        }
    }
    let n = vectors.len() as f32;
    for a in acc.iter_mut() {
        *a /= n;
    }
    Some(acc)
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Lloyd's k-means with a fixed seed, returning one cluster label per point.
///
/// - `n <= k`: every point is its own cluster (identity labels).
/// - Empty clusters keep their previous centroid.
/// - Stops when the label assignment is stable or after 20 iterations.
pub fn kmeans(points: &[Vec<f32>], k: usize) -> Vec<usize> {
    let n = points.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    if n <= k {
        return (0..n).collect();
    }

    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let picks = rand::seq::index::sample(&mut rng, n, k);
    let mut centroids: Vec<Vec<f32>> = picks.iter().map(|i| points[i].clone()).collect();
    let mut labels = vec![0usize; n];

    for _ in 0..KMEANS_MAX_ITER {
        let new_labels: Vec<usize> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| (idx, squared_euclidean(p, c)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(idx, _)| idx)
                    .unwrap_or(0)
            })
            .collect();

        if new_labels == labels {
            break;
        }
        labels = new_labels;

        for (idx, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&[f32]> = points
                .iter()
                .zip(labels.iter())
                .filter(|(_, l)| **l == idx)
                .map(|(p, _)| p.as_slice())
                .collect();
            if let Some(m) = mean(&members) {
                *centroid = m;
            }
        }
    }

    labels
}

/// Shannon entropy (natural log) of a discrete label assignment.
///
/// Returns 0.0 for one or fewer samples.
pub fn assignment_entropy<T>(labels: impl IntoIterator<Item = T>) -> f64
where
    T: Eq + Hash,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let total: usize = counts.values().sum();
    if total <= 1 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for c in counts.values() {
        let p = *c as f64 / total as f64;
        entropy -= p * (p + 1e-12).ln();
    }
    entropy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_zero_norm_is_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_of_parallel_and_orthogonal() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn running_mean_matches_batch_mean() {
        // Property: after N incremental updates from a fresh vector, the
        // running mean equals the batch mean of all samples.
        let samples: Vec<Vec<f32>> = vec![
            vec![1.0, 0.0, 3.0],
            vec![0.5, 2.0, 1.0],
            vec![-1.0, 4.0, 0.0],
            vec![2.5, -2.0, 2.0],
        ];
        let mut mu = samples[0].clone();
        for (n, x) in samples.iter().enumerate().skip(1) {
            mu = running_mean(&mu, n as i64, x);
        }
        let refs: Vec<&[f32]> = samples.iter().map(|v| v.as_slice()).collect();
        let batch = mean(&refs).unwrap();
        for (a, b) in mu.iter().zip(batch.iter()) {
            assert!((a - b).abs() < 1e-5, "running {a} vs batch {b}");
        }
    }

    #[test]
    fn running_mean_of_zero_samples_is_the_new_vector() {
        let mu = running_mean(&[0.0, 0.0], 0, &[3.0, 4.0]);
        assert_eq!(mu, vec![3.0, 4.0]);
    }

    #[test]
    fn kmeans_identity_when_fewer_points_than_clusters() {
        let points = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(kmeans(&points, 4), vec![0, 1]);
    }

    #[test]
    fn kmeans_separates_obvious_clusters() {
        let mut points = Vec::new();
        for i in 0..10 {
            points.push(vec![10.0 + (i as f32) * 0.01, 10.0]);
        }
        for i in 0..10 {
            points.push(vec![-10.0 - (i as f32) * 0.01, -10.0]);
        }
        let labels = kmeans(&points, 2);
        let first = labels[0];
        assert!(labels[..10].iter().all(|l| *l == first));
        assert!(labels[10..].iter().all(|l| *l != first));
    }

    #[test]
    fn kmeans_is_deterministic() {
        let points: Vec<Vec<f32>> = (0..30)
            .map(|i| vec![(i % 7) as f32, (i % 3) as f32, (i % 5) as f32])
            .collect();
        assert_eq!(kmeans(&points, 3), kmeans(&points, 3));
    }

    #[test]
    fn entropy_of_even_binary_split() {
        // 15/15 split: H = ln 2 ≈ 0.693
        let labels: Vec<u8> = (0..30).map(|i| (i % 2) as u8).collect();
        let h = assignment_entropy(labels);
        assert!((h - 0.6931).abs() < 1e-3, "H = {h}");
    }

    #[test]
    fn entropy_of_uniform_eight_way_split() {
        // Uniform over 8 labels: H = ln 8 ≈ 2.079
        let labels: Vec<u8> = (0..32).map(|i| (i % 8) as u8).collect();
        let h = assignment_entropy(labels);
        assert!((h - 2.0794).abs() < 1e-3, "H = {h}");
    }

    #[test]
    fn entropy_of_single_label_is_zero() {
        assert_eq!(assignment_entropy(vec![1u8; 40]), 0.0);
        assert_eq!(assignment_entropy(Vec::<u8>::new()), 0.0);
        assert_eq!(assignment_entropy(vec![1u8]), 0.0);
    }
}
