//! Engine façade
//!
//! The only entity that mutates state. Adds go write-ahead-log first, then
//! dataset, under the exclusive lock; builds run IVF training under the
//! exclusive lock and checkpoint the log on success; searches run under the
//! shared lock against a consistent snapshot.
//!
//! Lock order: engine lock → WAL mutex. Never the reverse.

use std::path::PathBuf;

use thiserror::Error;

use quiver_core::dataset::{DatasetError, VectorDataset, VectorId};
use quiver_core::ivf::{IndexError, IvfIndex, Neighbor, SearchParams};
use quiver_core::pool::WorkerPool;

use crate::sync::RwLock;
use crate::wal::{RecordError, ReplayStats, Wal, WalError};

/// WAL operation recorded for every accepted vector.
const OP_ADD_VECTOR: &str = "ADD_VECTOR";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("n_lists must be at least 1")]
    InvalidListCount,

    #[error("dim must be at least 1")]
    InvalidDimension,
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Vector dimension (required, fixed for the engine's lifetime).
    pub dim: usize,

    /// Path of the write-ahead log. `None` disables durability.
    pub wal_path: Option<PathBuf>,

    /// Worker pool size; 0 selects the hardware parallelism (floor 1).
    pub worker_threads: usize,

    /// Cap on Lloyd iterations during index builds (default: 20).
    pub kmeans_max_iter: usize,

    /// PRNG seed for centroid initialization (default: 42).
    pub kmeans_seed: u64,
}

impl EngineConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            wal_path: None,
            worker_threads: 0,
            kmeans_max_iter: 20,
            kmeans_seed: 42,
        }
    }
}

struct CoreState {
    dataset: VectorDataset,
    index: Option<IvfIndex>,
}

/// Vector search engine: dataset + IVF index behind a writer-preferring
/// lock, with WAL-backed durability for adds.
pub struct Engine {
    config: EngineConfig,
    state: RwLock<CoreState>,
    wal: Option<Wal>,
    pool: WorkerPool,
}

impl Engine {
    /// Open an engine, replaying the WAL at `config.wal_path` if present.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        if config.dim == 0 {
            return Err(EngineError::InvalidDimension);
        }
        let mut dataset = VectorDataset::new(config.dim);

        let wal = match &config.wal_path {
            Some(path) => {
                let (wal, stats) = Wal::open(path, |op, payload| {
                    replay_record(&mut dataset, op, payload)
                })?;
                log_replay(path, stats);
                Some(wal)
            }
            None => None,
        };

        let pool = WorkerPool::new(config.worker_threads);
        tracing::info!(
            dim = config.dim,
            vectors = dataset.count(),
            workers = pool.threads(),
            "engine ready"
        );

        Ok(Self {
            config,
            state: RwLock::new(CoreState {
                dataset,
                index: None,
            }),
            wal,
            pool,
        })
    }

    /// Append a vector, returning its assigned id.
    ///
    /// The WAL record is written and fsynced before the dataset mutates; if
    /// the append fails, the dataset is untouched. The dimension check runs
    /// before the WAL write so a rejected vector never reaches the log.
    pub fn add(&self, vector: &[f32]) -> Result<VectorId, EngineError> {
        if vector.len() != self.config.dim {
            return Err(DatasetError::DimensionMismatch {
                expected: self.config.dim,
                actual: vector.len(),
            }
            .into());
        }

        let mut state = self.state.write();
        if let Some(wal) = &self.wal {
            wal.append(OP_ADD_VECTOR, &render_vector(vector))?;
        }
        let id = state.dataset.add(vector)?;
        Ok(id)
    }

    /// Train the IVF index over the current dataset.
    ///
    /// On success the WAL is checkpointed: every logged add is now part of
    /// the built engine state.
    pub fn build(&self, n_lists: usize) -> Result<(), EngineError> {
        if n_lists == 0 {
            return Err(EngineError::InvalidListCount);
        }

        let mut state = self.state.write();
        if state.index.is_some() {
            return Err(IndexError::AlreadyBuilt.into());
        }

        let mut index = IvfIndex::new(self.config.dim, n_lists);
        index.build(
            &state.dataset,
            &self.pool,
            self.config.kmeans_max_iter,
            self.config.kmeans_seed,
        )?;
        state.index = Some(index);

        if let Some(wal) = &self.wal {
            wal.checkpoint()?;
        }
        Ok(())
    }

    /// Find the k nearest stored vectors to `query`.
    pub fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>, EngineError> {
        let state = self.state.read();
        let index = state.index.as_ref().ok_or(IndexError::NotBuilt)?;
        Ok(index.search(query, &state.dataset, params)?)
    }

    /// Copy of the vector stored under `id`, if any.
    pub fn vector(&self, id: VectorId) -> Option<Vec<f32>> {
        let state = self.state.read();
        if id < state.dataset.count() {
            Some(state.dataset.get(id).to_vec())
        } else {
            None
        }
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }

    pub fn count(&self) -> u64 {
        self.state.read().dataset.count()
    }

    pub fn is_built(&self) -> bool {
        self.state.read().index.is_some()
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.threads()
    }
}

fn log_replay(path: &std::path::Path, stats: ReplayStats) {
    if stats == ReplayStats::default() {
        return;
    }
    tracing::info!(
        path = ?path,
        applied = stats.applied,
        skipped = stats.skipped,
        corrupt = stats.corrupt,
        "WAL recovery complete"
    );
}

fn replay_record(
    dataset: &mut VectorDataset,
    op: &str,
    payload: &str,
) -> Result<(), RecordError> {
    match op {
        OP_ADD_VECTOR => {
            let vector = parse_vector(payload)
                .map_err(|reason| RecordError::Corrupt(reason.to_string()))?;
            dataset
                .add(&vector)
                .map_err(|err| RecordError::Corrupt(err.to_string()))?;
            Ok(())
        }
        other => Err(RecordError::UnknownOp(other.to_string())),
    }
}

/// Render a vector as the canonical WAL payload, `[f0, f1, ...]`.
///
/// Rust's float formatting emits the shortest representation that parses
/// back to the identical bits, so replayed vectors are bit-exact.
pub fn render_vector(vector: &[f32]) -> String {
    format!("{:?}", vector)
}

/// Parse a WAL payload produced by [`render_vector`].
pub fn parse_vector(payload: &str) -> Result<Vec<f32>, &'static str> {
    let inner = payload
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or("payload is not a bracketed vector")?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|field| field.trim().parse::<f32>().map_err(|_| "invalid float"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_parse_round_trip() {
        let vectors: Vec<Vec<f32>> = vec![
            vec![1.0, 2.0, 3.0],
            vec![0.1, -0.2, 1e-7],
            vec![f32::MIN_POSITIVE, f32::MAX],
            vec![],
        ];
        for v in vectors {
            let rendered = render_vector(&v);
            let parsed = parse_vector(&rendered).unwrap();
            assert_eq!(v, parsed, "round trip of {rendered}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_vector("not a vector").is_err());
        assert!(parse_vector("[1.0, two]").is_err());
        assert!(parse_vector("1.0, 2.0").is_err());
    }

    #[test]
    fn test_add_and_search_exact_match() {
        let engine = Engine::open(EngineConfig::new(3)).unwrap();
        engine.add(&[1.0, 2.0, 3.0]).unwrap();
        engine.add(&[4.0, 5.0, 6.0]).unwrap();
        engine.build(1).unwrap();

        let params = SearchParams {
            k: 1,
            ..SearchParams::default()
        };
        let results = engine.search(&[1.0, 2.0, 3.0], &params).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 0);
        assert_eq!(results[0].distance, 0.0);
    }

    #[test]
    fn test_search_returns_ordered_pair() {
        let engine = Engine::open(EngineConfig::new(3)).unwrap();
        engine.add(&[1.0, 2.0, 3.0]).unwrap();
        engine.add(&[4.0, 5.0, 6.0]).unwrap();
        engine.build(1).unwrap();

        let params = SearchParams {
            k: 2,
            ..SearchParams::default()
        };
        let results = engine.search(&[4.0, 5.0, 6.0], &params).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[1].id, 0);
        assert_eq!(results[1].distance, 27.0);
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let engine = Engine::open(EngineConfig::new(3)).unwrap();
        let result = engine.add(&[1.0]);
        assert!(matches!(
            result,
            Err(EngineError::Dataset(DatasetError::DimensionMismatch { .. }))
        ));
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn test_search_before_build() {
        let engine = Engine::open(EngineConfig::new(2)).unwrap();
        engine.add(&[1.0, 2.0]).unwrap();
        let result = engine.search(&[1.0, 2.0], &SearchParams::default());
        assert!(matches!(
            result,
            Err(EngineError::Index(IndexError::NotBuilt))
        ));
    }

    #[test]
    fn test_build_zero_lists_rejected() {
        let engine = Engine::open(EngineConfig::new(2)).unwrap();
        engine.add(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            engine.build(0),
            Err(EngineError::InvalidListCount)
        ));
    }

    #[test]
    fn test_build_with_insufficient_data() {
        let engine = Engine::open(EngineConfig::new(2)).unwrap();
        engine.add(&[1.0, 2.0]).unwrap();
        let result = engine.build(8);
        assert!(matches!(
            result,
            Err(EngineError::Index(IndexError::Train(_)))
        ));
        assert!(!engine.is_built());
    }
}
