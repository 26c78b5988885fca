//! HTTP submission service for scanue.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /api/v1/runs` - Submit a task; returns once the run completes,
//!   fails or pauses at a human checkpoint
//! - `GET /api/v1/runs/{id}` - Current status of a run
//! - `POST /api/v1/runs/{id}/feedback` - Answer a pending checkpoint
//!
//! Request bodies are limited to 1 MiB.
//!
//! # Architecture
//!
//! ```text
//! Client
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API Gateway   │ ◄── This crate
//! │     (Axum)      │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │ WorkflowEngine  │ ───▶ │ CheckpointStore  │
//! └─────────────────┘      └──────────────────┘
//! ```

pub mod routes;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use state::AppState;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/runs", post(routes::submit_run))
        .route("/api/v1/runs/{id}", get(routes::get_run))
        .route("/api/v1/runs/{id}/feedback", post(routes::provide_feedback))
        // Middleware
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the given address.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state);

    info!(%addr, "Starting scanue API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
