// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP front-end — accepts instruction queues over REST.
//!
//! `POST /scrape` takes the same JSON array the file loader accepts, runs it
//! through the shared engine, and answers with the queue report. Queues are
//! serialized behind the store lock; a second request waits for the first to
//! finish.

use crate::engine::Engine;
use crate::instructions;
use crate::persist::Store;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

/// State shared by all HTTP handlers.
pub struct SharedState {
    pub engine: Engine,
    pub store: Mutex<Store>,
}

/// Build the axum Router with all endpoints.
pub fn router(state: Arc<SharedState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/scrape", post(handle_scrape))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the given port.
pub async fn start(port: u16, state: Arc<SharedState>) -> anyhow::Result<()> {
    let app = router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_scrape(
    State(state): State<Arc<SharedState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let list = match instructions::parse_instruction_list(body) {
        Ok(list) => list,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            );
        }
    };

    tracing::info!(count = list.len(), "accepted instruction queue");

    let mut store = state.store.lock().await;
    let report = state.engine.run_queue(&list, &mut *store).await;

    match serde_json::to_value(&report) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
