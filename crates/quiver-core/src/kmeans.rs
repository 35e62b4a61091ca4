//! K-means centroid training
//!
//! Standard Lloyd's iteration over the flat dataset, used to place the IVF
//! partitioning centroids. Initialization samples k distinct vectors with a
//! seeded PRNG owned by the trainer, so training is deterministic given
//! (seed, input, k, max_iter).

use rand::SeedableRng;
use thiserror::Error;

use crate::dataset::VectorDataset;
use crate::pool::WorkerPool;
use crate::simd;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrainError {
    #[error("insufficient data: {count} vectors for k = {k}")]
    InsufficientData { count: u64, k: usize },
}

/// Index of the nearest centroid to `vec`, with its squared distance.
///
/// Ties resolve to the lowest centroid index (strict `<` comparison).
pub(crate) fn nearest_centroid(centroids: &[f32], dim: usize, vec: &[f32]) -> (usize, f32) {
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for (c, centroid) in centroids.chunks_exact(dim).enumerate() {
        let d = simd::l2_sq(vec, centroid);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    (best, best_dist)
}

/// Lloyd's k-means trainer.
pub struct KMeans {
    k: usize,
    max_iter: usize,
    dim: usize,
    centroids: Vec<f32>,
}

impl KMeans {
    pub fn new(k: usize, max_iter: usize, dim: usize) -> Self {
        Self {
            k,
            max_iter,
            dim,
            centroids: Vec::new(),
        }
    }

    /// Trained centroids, row-major `k * dim`.
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    /// Consume the trainer, keeping only the centroid block.
    pub fn into_centroids(self) -> Vec<f32> {
        self.centroids
    }

    /// Run Lloyd's iteration until convergence or `max_iter`.
    ///
    /// The assignment step fans out over the pool in chunked id ranges; the
    /// chunking only partitions the argmin loop, so results do not depend on
    /// the worker count.
    pub fn train(
        &mut self,
        dataset: &VectorDataset,
        pool: &WorkerPool,
        seed: u64,
    ) -> Result<(), TrainError> {
        let n = dataset.count() as usize;
        if n < self.k {
            return Err(TrainError::InsufficientData {
                count: dataset.count(),
                k: self.k,
            });
        }

        self.init_centroids(dataset, seed);

        let mut assign = vec![0u32; n];
        let chunk_len = n.div_ceil(pool.threads()).max(1);

        for iter in 0..self.max_iter {
            // Assignment step: one task per id-range chunk.
            let centroids = &self.centroids;
            let dim = self.dim;
            let chunk_results: Vec<(Vec<u32>, usize)> = pool.scope(|s| {
                let handles: Vec<_> = assign
                    .chunks(chunk_len)
                    .enumerate()
                    .map(|(ci, prev)| {
                        let start = (ci * chunk_len) as u64;
                        s.submit(move || {
                            let mut fresh = Vec::with_capacity(prev.len());
                            let mut changed = 0usize;
                            for (off, &old) in prev.iter().enumerate() {
                                let vec = dataset.get(start + off as u64);
                                let (best, _) = nearest_centroid(centroids, dim, vec);
                                if best as u32 != old {
                                    changed += 1;
                                }
                                fresh.push(best as u32);
                            }
                            (fresh, changed)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.wait()).collect()
            });

            let mut changed = 0usize;
            let mut offset = 0usize;
            for (fresh, chunk_changed) in chunk_results {
                changed += chunk_changed;
                assign[offset..offset + fresh.len()].copy_from_slice(&fresh);
                offset += fresh.len();
            }

            if changed == 0 && iter > 0 {
                tracing::debug!("k-means converged after {} iterations", iter);
                break;
            }

            // Update step: recompute each centroid as the mean of its members.
            let mut sums = vec![0.0f32; self.k * self.dim];
            let mut counts = vec![0u64; self.k];
            for (i, vec) in dataset.iter().enumerate() {
                let c = assign[i] as usize;
                counts[c] += 1;
                let row = &mut sums[c * self.dim..(c + 1) * self.dim];
                for (acc, &x) in row.iter_mut().zip(vec) {
                    *acc += x;
                }
            }

            for c in 0..self.k {
                let row = c * self.dim..(c + 1) * self.dim;
                if counts[c] > 0 {
                    let inv = 1.0 / counts[c] as f32;
                    for x in &mut sums[row] {
                        *x *= inv;
                    }
                } else {
                    // Empty cluster: retain the previous centroid.
                    tracing::warn!("k-means cluster {} received no assignments", c);
                    sums[row.clone()].copy_from_slice(&self.centroids[row]);
                }
            }
            self.centroids = sums;
        }

        Ok(())
    }

    /// Copy k distinct, uniformly sampled dataset rows as initial centroids.
    fn init_centroids(&mut self, dataset: &VectorDataset, seed: u64) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let picks = rand::seq::index::sample(&mut rng, dataset.count() as usize, self.k);

        self.centroids = Vec::with_capacity(self.k * self.dim);
        for idx in picks.iter() {
            self.centroids.extend_from_slice(dataset.get(idx as u64));
        }
    }
}
