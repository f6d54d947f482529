//! Divisive k-means over sketch register bytes.
//!
//! One cluster holds all points initially; the largest splittable cluster is
//! repeatedly bisected with 2-means until no split produces two children of
//! at least `min_cluster_size` points. All tie-breaks are fixed (lower index
//! wins) and the RNG is seeded, so the output is a pure function of the
//! input bytes and the parameters.

use std::collections::BinaryHeap;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Clustering parameters; the defaults mirror the build pipeline constants.
#[derive(Debug, Clone)]
pub struct ClusteringParams {
    pub min_delta: f64,
    pub max_iter: u32,
    pub min_cluster_size: usize,
    pub seed: u64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            min_delta: 1e-4,
            max_iter: 10,
            min_cluster_size: 50,
            seed: 42,
        }
    }
}

/// Result of a divisive clustering run.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// `clusters[i]` is the cluster id of point i, in [0, num_clusters).
    pub clusters: Vec<u32>,
    pub num_clusters: usize,
}

fn squared_distance(a: &[u8], b: &[u8]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

fn squared_shift(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn centroid_distance(point: &[u8], centroid: &[f64]) -> f64 {
    point
        .iter()
        .zip(centroid)
        .map(|(&x, c)| {
            let d = x as f64 - c;
            d * d
        })
        .sum()
}

struct Split {
    left: Vec<u32>,
    right: Vec<u32>,
}

/// 2-means on `members`, returning the two children in stable member order.
fn bisect(
    points: &[u8],
    point_len: usize,
    members: &[u32],
    params: &ClusteringParams,
    rng: &mut StdRng,
) -> Split {
    let point = |i: u32| &points[i as usize * point_len..(i as usize + 1) * point_len];

    // Seed centroids from two distinct random members.
    let a = rng.random_range(0..members.len());
    let mut b = rng.random_range(0..members.len() - 1);
    if b >= a {
        b += 1;
    }
    let mut centroids: [Vec<f64>; 2] = [
        point(members[a]).iter().map(|&v| v as f64).collect(),
        point(members[b]).iter().map(|&v| v as f64).collect(),
    ];

    let mut assignment = vec![0u8; members.len()];
    for _ in 0..params.max_iter {
        // Assign; on ties the lower centroid index wins.
        for (slot, &m) in members.iter().enumerate() {
            let d0 = centroid_distance(point(m), &centroids[0]);
            let d1 = centroid_distance(point(m), &centroids[1]);
            assignment[slot] = (d1 < d0) as u8;
        }

        // Recompute means; a centroid that lost all members keeps its place.
        let mut sums = [vec![0f64; point_len], vec![0f64; point_len]];
        let mut counts = [0usize; 2];
        for (slot, &m) in members.iter().enumerate() {
            let side = assignment[slot] as usize;
            counts[side] += 1;
            for (s, &v) in sums[side].iter_mut().zip(point(m)) {
                *s += v as f64;
            }
        }
        let mut shift = 0f64;
        for side in 0..2 {
            if counts[side] == 0 {
                continue;
            }
            let next: Vec<f64> = sums[side].iter().map(|s| s / counts[side] as f64).collect();
            shift = shift.max(squared_shift(&centroids[side], &next));
            centroids[side] = next;
        }
        if shift < params.min_delta * params.min_delta {
            break;
        }
    }

    let mut left = Vec::new();
    let mut right = Vec::new();
    for (slot, &m) in members.iter().enumerate() {
        if assignment[slot] == 0 {
            left.push(m);
        } else {
            right.push(m);
        }
    }
    Split { left, right }
}

/// Divisive k-means over `num_points = points.len() / point_len` points.
///
/// A cluster smaller than `2 * min_cluster_size` can never be split and is
/// final; in particular `min_cluster_size > num_points` yields one cluster.
pub fn kmeans_divisive(points: &[u8], point_len: usize, params: &ClusteringParams) -> Clustering {
    assert!(point_len > 0 && points.len() % point_len == 0);
    let num_points = points.len() / point_len;
    if num_points == 0 {
        return Clustering {
            clusters: Vec::new(),
            num_clusters: 0,
        };
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut clusters: Vec<Vec<u32>> = vec![(0..num_points as u32).collect()];

    // Largest splittable cluster first; lower id wins ties. Heap entries are
    // validated against the current size on pop so stale entries are skipped.
    let mut heap: BinaryHeap<(usize, std::cmp::Reverse<usize>)> = BinaryHeap::new();
    heap.push((clusters[0].len(), std::cmp::Reverse(0)));

    let min_size = params.min_cluster_size.max(1);
    while let Some((size, std::cmp::Reverse(idx))) = heap.pop() {
        if clusters[idx].len() != size {
            continue; // stale entry
        }
        if size < 2 * min_size || size < 2 {
            continue; // cannot produce two valid children
        }
        let split = bisect(points, point_len, &clusters[idx], params, &mut rng);
        if split.left.len() >= min_size && split.right.len() >= min_size {
            debug!(
                "split cluster {idx} ({size}) into {} + {}",
                split.left.len(),
                split.right.len()
            );
            clusters[idx] = split.left;
            let new_idx = clusters.len();
            clusters.push(split.right);
            heap.push((clusters[idx].len(), std::cmp::Reverse(idx)));
            heap.push((clusters[new_idx].len(), std::cmp::Reverse(new_idx)));
        }
        // A rejected split leaves the cluster whole and final.
    }

    let mut labels = vec![0u32; num_points];
    for (cluster_id, members) in clusters.iter().enumerate() {
        for &m in members {
            labels[m as usize] = cluster_id as u32;
        }
    }
    Clustering {
        clusters: labels,
        num_clusters: clusters.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(points: &[&[u8]]) -> (Vec<u8>, usize) {
        let len = points[0].len();
        let mut out = Vec::new();
        for p in points {
            assert_eq!(p.len(), len);
            out.extend_from_slice(p);
        }
        (out, len)
    }

    #[test]
    fn test_single_cluster_when_unsplittable() {
        let (points, len) = flat(&[&[0, 0, 0, 0], &[255, 255, 255, 255], &[1, 0, 1, 0]]);
        let params = ClusteringParams::default(); // min_cluster_size 50 > 3
        let result = kmeans_divisive(&points, len, &params);
        assert_eq!(result.num_clusters, 1);
        assert_eq!(result.clusters, vec![0, 0, 0]);
    }

    #[test]
    fn test_two_well_separated_groups() {
        let (points, len) = flat(&[
            &[0, 0, 0, 0],
            &[250, 250, 250, 250],
            &[1, 2, 0, 1],
            &[251, 249, 250, 252],
            &[0, 1, 1, 0],
            &[250, 251, 250, 250],
        ]);
        let params = ClusteringParams {
            min_cluster_size: 3,
            ..ClusteringParams::default()
        };
        let result = kmeans_divisive(&points, len, &params);
        assert_eq!(result.num_clusters, 2);
        let c = &result.clusters;
        assert_eq!(c[0], c[2]);
        assert_eq!(c[0], c[4]);
        assert_eq!(c[1], c[3]);
        assert_eq!(c[1], c[5]);
        assert_ne!(c[0], c[1]);
    }

    #[test]
    fn test_identical_points_never_split() {
        let (points, len) = flat(&[&[9, 9], &[9, 9], &[9, 9], &[9, 9]]);
        let params = ClusteringParams {
            min_cluster_size: 1,
            ..ClusteringParams::default()
        };
        // All points tie; lower centroid index wins, so one child is empty
        // and the split is rejected.
        let result = kmeans_divisive(&points, len, &params);
        assert_eq!(result.num_clusters, 1);
    }

    #[test]
    fn test_determinism() {
        let points: Vec<u8> = (0..160).map(|i| (i * 37 % 251) as u8).collect();
        let params = ClusteringParams {
            min_cluster_size: 2,
            ..ClusteringParams::default()
        };
        let a = kmeans_divisive(&points, 16, &params);
        let b = kmeans_divisive(&points, 16, &params);
        assert_eq!(a.clusters, b.clusters);
        assert_eq!(a.num_clusters, b.num_clusters);
    }

    #[test]
    fn test_disjoint_pair_splits_with_min_size_one() {
        let (points, len) = flat(&[&[0, 0, 0, 0], &[200, 200, 200, 200]]);
        let params = ClusteringParams {
            min_cluster_size: 1,
            ..ClusteringParams::default()
        };
        let result = kmeans_divisive(&points, len, &params);
        assert_eq!(result.num_clusters, 2);
        assert_ne!(result.clusters[0], result.clusters[1]);
    }
}
