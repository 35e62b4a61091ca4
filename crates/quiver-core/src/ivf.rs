//! IVF (inverted-file) index
//!
//! Build partitions the dataset into Voronoi-like buckets around k-means
//! centroids; search probes a query-adaptive subset of buckets and refines
//! the survivors into an exactly ordered top-k.
//!
//! # Search
//!
//! 1. Rank all centroids by squared L2 to the query.
//! 2. Probe buckets in rank order until `max_nprobe` buckets have been
//!    scanned or the next bucket's centroid distance exceeds
//!    `d_best * (1 + probe_ratio)`. The nearest bucket is always probed.
//! 3. Keep the best `k * refine_factor` candidates in a bounded max-heap
//!    (coarse stage), then sort the survivors and return the first k
//!    (refine stage). The oversized coarse pool absorbs the variance of
//!    centroid pruning; the final sort fixes the ordering, ties broken by
//!    ascending id.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::dataset::{VectorDataset, VectorId};
use crate::kmeans::{nearest_centroid, KMeans, TrainError};
use crate::pool::WorkerPool;
use crate::simd;

/// Guards the probe threshold against floating drift excluding the best
/// bucket.
const PROBE_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("index has not been built")]
    NotBuilt,

    #[error("index is already built")]
    AlreadyBuilt,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Train(#[from] TrainError),
}

/// One search hit: vector id and squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: VectorId,
    pub distance: f32,
}

/// Search-time knobs; the defaults mirror the engine's HTTP contract.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// Number of results to return.
    pub k: usize,
    /// Probe buckets whose centroid distance is within
    /// `(1 + probe_ratio) * d_best`.
    pub probe_ratio: f32,
    /// Hard cap on probed buckets.
    pub max_nprobe: usize,
    /// Coarse-pool oversizing factor: the heap holds `k * refine_factor`
    /// candidates.
    pub refine_factor: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 10,
            probe_ratio: 0.2,
            max_nprobe: 20,
            refine_factor: 5,
        }
    }
}

/// Coarse-stage heap entry. Max-heap over (distance, id) so the worst
/// candidate sits on top and eviction is deterministic under distance ties.
#[derive(Clone, Copy)]
struct Candidate {
    id: VectorId,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.id == other.id
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Inverted-file index over a [`VectorDataset`].
///
/// States: `Empty` (created) → `Built` (after [`build`](IvfIndex::build)),
/// immutable thereafter. The index never retains a reference to the dataset;
/// both `build` and `search` receive it as a parameter under the caller's
/// lock.
pub struct IvfIndex {
    dim: usize,
    n_lists: usize,
    centroids: Vec<f32>,
    lists: Vec<Vec<VectorId>>,
    built: bool,
}

impl IvfIndex {
    /// Create an empty index with `n_lists` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `n_lists == 0`; callers validate list counts before
    /// construction.
    pub fn new(dim: usize, n_lists: usize) -> Self {
        assert!(n_lists > 0, "n_lists must be at least 1");
        Self {
            dim,
            n_lists,
            centroids: Vec::new(),
            lists: Vec::new(),
            built: false,
        }
    }

    pub fn n_lists(&self) -> usize {
        self.n_lists
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Bucket occupancy, for diagnostics and invariant checks.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.len()).collect()
    }

    /// Train centroids and populate the inverted lists.
    ///
    /// Phase 1 runs k-means with `k = n_lists`; phase 2 assigns every vector
    /// to its nearest centroid, fanned out over the pool in chunked id
    /// ranges. After a successful build the index is sealed.
    pub fn build(
        &mut self,
        dataset: &VectorDataset,
        pool: &WorkerPool,
        kmeans_max_iter: usize,
        kmeans_seed: u64,
    ) -> Result<(), IndexError> {
        if self.built {
            return Err(IndexError::AlreadyBuilt);
        }

        tracing::info!(n_lists = self.n_lists, "training IVF centroids");
        let mut kmeans = KMeans::new(self.n_lists, kmeans_max_iter, self.dim);
        kmeans.train(dataset, pool, kmeans_seed)?;
        self.centroids = kmeans.into_centroids();

        tracing::info!("populating inverted lists");
        let n = dataset.count() as usize;
        let chunk_len = n.div_ceil(pool.threads()).max(1);
        let centroids = &self.centroids;
        let dim = self.dim;

        let chunk_assignments: Vec<Vec<u32>> = pool.scope(|s| {
            let handles: Vec<_> = (0..n)
                .step_by(chunk_len)
                .map(|start| {
                    let end = (start + chunk_len).min(n);
                    s.submit(move || {
                        (start..end)
                            .map(|i| nearest_centroid(centroids, dim, dataset.get(i as u64)).0 as u32)
                            .collect::<Vec<u32>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.wait()).collect()
        });

        let mut lists = vec![Vec::new(); self.n_lists];
        let mut id = 0u64;
        for chunk in chunk_assignments {
            for list_idx in chunk {
                lists[list_idx as usize].push(id);
                id += 1;
            }
        }
        self.lists = lists;
        self.built = true;

        tracing::info!(
            vectors = n,
            populated = self.lists.iter().filter(|l| !l.is_empty()).count(),
            "IVF build complete"
        );
        Ok(())
    }

    /// Two-stage probe-and-refine search for the k nearest vectors.
    ///
    /// Results ascend strictly by (distance, id).
    pub fn search(
        &self,
        query: &[f32],
        dataset: &VectorDataset,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>, IndexError> {
        if !self.built {
            return Err(IndexError::NotBuilt);
        }
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if params.k == 0 {
            return Ok(Vec::new());
        }

        // Rank centroids by distance to the query, ties by index.
        let mut ranked: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(self.dim)
            .map(|c| simd::l2_sq(query, c))
            .zip(0..self.n_lists)
            .collect();
        ranked.sort_unstable_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let threshold = ranked[0].0 * (1.0 + params.probe_ratio) + PROBE_EPSILON;
        let max_nprobe = params.max_nprobe.max(1);
        // The coarse pool can never hold more candidates than the dataset.
        let pool_size = params
            .k
            .saturating_mul(params.refine_factor.max(1))
            .min(dataset.count() as usize);

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(pool_size);
        for (probed, &(centroid_dist, list_idx)) in ranked.iter().enumerate() {
            if probed >= max_nprobe {
                break;
            }
            // The nearest bucket is probed unconditionally.
            if probed > 0 && centroid_dist > threshold {
                break;
            }

            for &id in &self.lists[list_idx] {
                let distance = simd::l2_sq(query, dataset.get(id));
                let candidate = Candidate { id, distance };
                if heap.len() < pool_size {
                    heap.push(candidate);
                } else if let Some(worst) = heap.peek() {
                    if candidate < *worst {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
        }

        // Refine: exact ordering of the coarse pool, first k survive.
        let mut results: Vec<Neighbor> = heap
            .into_iter()
            .map(|c| Neighbor {
                id: c.id,
                distance: c.distance,
            })
            .collect();
        results.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        results.truncate(params.k);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_dataset(n: usize, dim: usize, seed: u64) -> VectorDataset {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut dataset = VectorDataset::new(dim);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect();
            dataset.add(&v).unwrap();
        }
        dataset
    }

    fn brute_force(query: &[f32], dataset: &VectorDataset, k: usize) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = (0..dataset.count())
            .map(|id| Neighbor {
                id,
                distance: simd::l2_sq(query, dataset.get(id)),
            })
            .collect();
        all.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap()
                .then(a.id.cmp(&b.id))
        });
        all.truncate(k);
        all
    }

    fn built_index(dataset: &VectorDataset, n_lists: usize) -> (IvfIndex, WorkerPool) {
        let pool = WorkerPool::new(2);
        let mut index = IvfIndex::new(dataset.dim(), n_lists);
        index.build(dataset, &pool, 20, 42).unwrap();
        (index, pool)
    }

    #[test]
    fn test_search_before_build() {
        let dataset = random_dataset(10, 4, 1);
        let index = IvfIndex::new(4, 2);
        let result = index.search(&[0.0; 4], &dataset, &SearchParams::default());
        assert_eq!(result, Err(IndexError::NotBuilt));
    }

    #[test]
    fn test_rebuild_rejected() {
        let dataset = random_dataset(10, 4, 1);
        let pool = WorkerPool::new(1);
        let mut index = IvfIndex::new(4, 2);
        index.build(&dataset, &pool, 5, 42).unwrap();
        assert_eq!(
            index.build(&dataset, &pool, 5, 42),
            Err(IndexError::AlreadyBuilt)
        );
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let dataset = random_dataset(10, 4, 1);
        let (index, _pool) = built_index(&dataset, 2);
        let result = index.search(&[0.0; 3], &dataset, &SearchParams::default());
        assert_eq!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_buckets_partition_ids() {
        let dataset = random_dataset(500, 8, 3);
        let (index, _pool) = built_index(&dataset, 10);

        let mut seen = vec![false; 500];
        for (list_idx, size) in index.bucket_sizes().iter().enumerate() {
            for &id in &index.lists[list_idx][..*size] {
                assert!(!seen[id as usize], "id {} in two buckets", id);
                seen[id as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "every id appears in some bucket");
    }

    #[test]
    fn test_bucket_assignment_is_nearest_centroid() {
        let dataset = random_dataset(200, 8, 4);
        let (index, _pool) = built_index(&dataset, 8);

        for (list_idx, list) in index.lists.iter().enumerate() {
            for &id in list {
                let (best, _) = nearest_centroid(&index.centroids, 8, dataset.get(id));
                assert_eq!(best, list_idx);
            }
        }
    }

    #[test]
    fn test_single_list_is_brute_force() {
        let dataset = random_dataset(1000, 8, 5);
        let (index, _pool) = built_index(&dataset, 1);

        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        for _ in 0..10 {
            let query: Vec<f32> = (0..8).map(|_| rng.gen::<f32>() - 0.5).collect();
            let params = SearchParams {
                k: 10,
                max_nprobe: 1,
                ..SearchParams::default()
            };
            let got = index.search(&query, &dataset, &params).unwrap();
            let expected = brute_force(&query, &dataset, 10);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_unbounded_probe_is_brute_force() {
        let dataset = random_dataset(400, 6, 6);
        let (index, _pool) = built_index(&dataset, 16);

        let query: Vec<f32> = vec![0.1; 6];
        let params = SearchParams {
            k: 10,
            probe_ratio: f32::INFINITY,
            max_nprobe: 16,
            refine_factor: 5,
        };
        let got = index.search(&query, &dataset, &params).unwrap();
        let expected = brute_force(&query, &dataset, 10);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_k_zero_returns_empty() {
        let dataset = random_dataset(50, 4, 7);
        let (index, _pool) = built_index(&dataset, 4);
        let params = SearchParams {
            k: 0,
            ..SearchParams::default()
        };
        assert!(index.search(&[0.0; 4], &dataset, &params).unwrap().is_empty());
    }

    #[test]
    fn test_k_larger_than_count() {
        let dataset = random_dataset(5, 4, 8);
        let (index, _pool) = built_index(&dataset, 1);
        let params = SearchParams {
            k: 50,
            ..SearchParams::default()
        };
        let results = index.search(&[0.0; 4], &dataset, &params).unwrap();
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn test_results_ascend_with_id_tie_break() {
        // Duplicate vectors force distance ties.
        let mut dataset = VectorDataset::new(2);
        for _ in 0..4 {
            dataset.add(&[1.0, 1.0]).unwrap();
        }
        for _ in 0..4 {
            dataset.add(&[3.0, 3.0]).unwrap();
        }
        let (index, _pool) = built_index(&dataset, 1);

        let params = SearchParams {
            k: 8,
            ..SearchParams::default()
        };
        let results = index.search(&[1.0, 1.0], &dataset, &params).unwrap();
        assert_eq!(results.len(), 8);
        for pair in results.windows(2) {
            assert!(
                pair[0].distance < pair[1].distance
                    || (pair[0].distance == pair[1].distance && pair[0].id < pair[1].id)
            );
        }
        // The four exact matches come first, in id order.
        assert_eq!(
            results[..4].iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_max_nprobe_zero_still_probes_first_bucket() {
        let dataset = random_dataset(100, 4, 9);
        let (index, _pool) = built_index(&dataset, 4);
        let params = SearchParams {
            k: 5,
            max_nprobe: 0,
            ..SearchParams::default()
        };
        let results = index.search(&[0.0; 4], &dataset, &params).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn test_tight_threshold_probes_only_nearest_bucket() {
        // Two well-separated clumps; a query at one clump with probe_ratio 0
        // must only scan that clump's bucket.
        let mut dataset = VectorDataset::new(2);
        for i in 0..20 {
            dataset.add(&[i as f32 * 0.01, 0.0]).unwrap();
        }
        for i in 0..20 {
            dataset.add(&[100.0 + i as f32 * 0.01, 0.0]).unwrap();
        }
        let (index, _pool) = built_index(&dataset, 2);

        let params = SearchParams {
            k: 40,
            probe_ratio: 0.0,
            max_nprobe: 20,
            refine_factor: 1,
        };
        let results = index.search(&[0.05, 0.0], &dataset, &params).unwrap();
        // Only the near clump was probed.
        assert!(results.len() <= 20);
        assert!(results.iter().all(|n| n.id < 20));
    }
}
