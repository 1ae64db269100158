//! REST query surface over the ledger (feature `api`)
//!
//! Read-only GET endpoints returning the projections from [`crate::query`].
//! Failures map to a short machine-readable code and a human message;
//! private keys never appear in any payload.

use crate::error::Result as NodeResult;
use crate::ledger::Ledger;
use crate::query;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

const MAX_LATEST_BLOCKS: usize = 100;

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<RwLock<Ledger>>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Response {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError { code: "NotFound", message: message.into() }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct LatestParams {
    count: Option<usize>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/chain", get(chain))
        .route("/blocks/latest", get(blocks_latest))
        .route("/blocks/height/:height", get(block_by_height))
        .route("/blocks/hash/:hash", get(block_by_hash))
        .route("/transactions/:id", get(transaction))
        .route("/address/:address", get(address))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_api_server(state: ApiState, port: u16) -> NodeResult<()> {
    let bind = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| crate::error::NodeError::NetworkError(format!("api port {} unavailable: {}", port, e)))?;
    info!(addr = %bind, "api server started");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::error::NodeError::NetworkError(format!("api server failed: {}", e)))?;
    Ok(())
}

async fn status(State(state): State<ApiState>) -> Response {
    let ledger = state.ledger.read().await;
    Json(query::node_status(&ledger)).into_response()
}

async fn chain(State(state): State<ApiState>) -> Response {
    let ledger = state.ledger.read().await;
    Json(query::chain_info(&ledger)).into_response()
}

async fn blocks_latest(State(state): State<ApiState>, Query(params): Query<LatestParams>) -> Response {
    let count = params.count.unwrap_or(10).min(MAX_LATEST_BLOCKS);
    let ledger = state.ledger.read().await;
    Json(query::latest_blocks(&ledger, count)).into_response()
}

async fn block_by_height(State(state): State<ApiState>, Path(height): Path<u64>) -> Response {
    let ledger = state.ledger.read().await;
    match query::block_by_height(&ledger, height) {
        Some(block) => Json(block).into_response(),
        None => ApiError::not_found(format!("no block at height {}", height)),
    }
}

async fn block_by_hash(State(state): State<ApiState>, Path(hash): Path<String>) -> Response {
    let ledger = state.ledger.read().await;
    match query::block_by_hash(&ledger, &hash) {
        Some(block) => Json(block).into_response(),
        None => ApiError::not_found(format!("no block with hash {}", hash)),
    }
}

async fn transaction(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let ledger = state.ledger.read().await;
    match query::transaction(&ledger, &id) {
        Some(view) => Json(view).into_response(),
        None => ApiError::not_found(format!("no confirmed transaction {}", id)),
    }
}

async fn address(State(state): State<ApiState>, Path(address): Path<String>) -> Response {
    let ledger = state.ledger.read().await;
    Json(query::address_view(&ledger, &address)).into_response()
}
