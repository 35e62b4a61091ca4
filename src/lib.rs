//! Quiver-DB: an in-process IVF vector search engine with WAL durability
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │        POST /vectors, /search, /build · GET /health         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Engine façade                         │
//! │      writer-preferring lock · WAL-first adds · builds       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            IVF index + k-means (quiver-core)                │
//! │        flat dataset · worker pool · SIMD kernels            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod server;
pub mod sync;
pub mod wal;

pub use engine::{Engine, EngineConfig, EngineError};
pub use quiver_core::ivf::{Neighbor, SearchParams};
