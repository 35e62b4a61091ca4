//! HTTP server for Quiver-DB
//!
//! Thin transport over the engine façade; no core decision depends on it.
//!
//! # Endpoints
//!
//! - `POST /vectors` - Add a vector
//! - `POST /search`  - Query for nearest neighbors
//! - `POST /build`   - Build the IVF index
//! - `GET /health`   - Server health and engine stats

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use quiver_core::dataset::DatasetError;
use quiver_core::ivf::{IndexError, SearchParams};

use crate::engine::{Engine, EngineError};

/// Add request body
#[derive(Debug, Serialize, Deserialize)]
pub struct AddRequest {
    /// Vector to insert (must match the engine dimension)
    pub vector: Vec<f32>,
}

/// Add response
#[derive(Debug, Serialize, Deserialize)]
pub struct AddResponse {
    /// Assigned vector id
    pub id: u64,
}

/// Search request body
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query vector (must match the engine dimension)
    pub vector: Vec<f32>,

    /// Number of results to return (default: 10)
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Probe buckets within (1 + probe_ratio) of the nearest centroid
    /// distance (default: 0.2)
    #[serde(default = "default_probe_ratio")]
    pub probe_ratio: f32,

    /// Hard cap on probed buckets (default: 20)
    #[serde(default = "default_max_nprobe")]
    pub max_nprobe: u32,

    /// Coarse-pool oversizing factor (default: 5)
    #[serde(default = "default_refine_factor")]
    pub refine_factor: u32,
}

fn default_top_k() -> u32 {
    10
}

fn default_probe_ratio() -> f32 {
    0.2
}

fn default_max_nprobe() -> u32 {
    20
}

fn default_refine_factor() -> u32 {
    5
}

/// Single search result
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: u64,
    /// Squared L2 distance to the query (lower = closer)
    pub distance: f32,
}

/// Search response
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query_time_ms: f64,
}

/// Build request body
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Number of IVF buckets to train
    pub n_lists: u32,
}

/// Build response
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildResponse {
    pub status: String,
    pub n_lists: u32,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub dim: usize,
    pub vectors: u64,
    pub index_built: bool,
    pub worker_threads: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: &EngineError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        EngineError::Dataset(DatasetError::DimensionMismatch { .. }) => StatusCode::BAD_REQUEST,
        EngineError::Index(IndexError::DimensionMismatch { .. }) => StatusCode::BAD_REQUEST,
        EngineError::Index(IndexError::Train(_)) => StatusCode::BAD_REQUEST,
        EngineError::Index(IndexError::NotBuilt) => StatusCode::CONFLICT,
        EngineError::Index(IndexError::AlreadyBuilt) => StatusCode::CONFLICT,
        EngineError::InvalidListCount | EngineError::InvalidDimension => StatusCode::BAD_REQUEST,
        EngineError::Wal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// POST /vectors - Add a vector
async fn add_vector(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<AddRequest>,
) -> impl IntoResponse {
    match engine.add(&request.vector) {
        Ok(id) => (StatusCode::CREATED, Json(AddResponse { id })).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// POST /search - Query for nearest neighbors
async fn search(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    let params = SearchParams {
        k: request.top_k as usize,
        probe_ratio: request.probe_ratio,
        max_nprobe: request.max_nprobe as usize,
        refine_factor: request.refine_factor as usize,
    };

    let start = Instant::now();
    match engine.search(&request.vector, &params) {
        Ok(neighbors) => {
            let query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            let response = SearchResponse {
                results: neighbors
                    .into_iter()
                    .map(|n| SearchResult {
                        id: n.id,
                        distance: n.distance,
                    })
                    .collect(),
                query_time_ms,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => error_response(&err).into_response(),
    }
}

/// POST /build - Build the IVF index
async fn build(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<BuildRequest>,
) -> impl IntoResponse {
    match engine.build(request.n_lists as usize) {
        Ok(()) => (
            StatusCode::OK,
            Json(BuildResponse {
                status: "built".to_string(),
                n_lists: request.n_lists,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// GET /health - Server health and engine stats
async fn health(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        dim: engine.dim(),
        vectors: engine.count(),
        index_built: engine.is_built(),
        worker_threads: engine.worker_threads(),
    };
    (StatusCode::OK, Json(response))
}

/// Create the axum router
pub fn create_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/vectors", post(add_vector))
        .route("/search", post(search))
        .route("/build", post(build))
        .route("/health", get(health))
        .layer(cors)
        .with_state(engine)
}

/// Start the server
pub async fn serve(engine: Arc<Engine>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = create_router(engine);

    tracing::info!("starting Quiver-DB server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
