//! Quiver Core – vector dataset, SIMD distance kernels, k-means training,
//! and the IVF index
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    IVF Index (build/search)                 │
//! │        centroid pruning · probe-and-refine top-k            │
//! ├─────────────────────────────────────────────────────────────┤
//! │          K-Means Trainer (Lloyd, seeded, parallel)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │   VectorDataset (flat f32 rows)  ·  WorkerPool (FIFO)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │       SIMD kernels (NEON / AVX2 / scalar, L2² + IP)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod dataset;
pub mod ivf;
pub mod kmeans;
pub mod pool;
pub mod simd;

pub use dataset::{VectorDataset, VectorId};
pub use ivf::{IvfIndex, Neighbor, SearchParams};
pub use pool::WorkerPool;
pub use simd::{ip_distance, l2_distance_squared};
