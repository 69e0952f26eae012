//! HTTP API for building, executing and inspecting swap orders
//!
//! Build routes return the order record (EVM-source orders include the
//! typed payload the maker signs). Execution routes drive the escrow
//! legs and reply with a minimal acknowledgement; the full record is
//! always available from the lookup routes.

use crate::codec;
use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::order::UserIntent;
use crate::relay::RelayerEngine;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RelayerEngine>,
    started_at: Instant,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, engine: Arc<RelayerEngine>) -> RelayerResult<()> {
    let state = AppState {
        engine,
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/chains", get(get_chains))
        .route("/api/swap/eth_to_cosmos/build", post(build_evm_order))
        .route("/api/swap/cosmos_to_eth/build", post(build_cosmos_order))
        .route("/api/swap/eth_to_cosmos", post(execute_evm_order))
        .route("/api/swap/cosmos_to_eth", post(confirm_cosmos_order))
        .route("/api/swap/reveal_secret", post(reveal_secret))
        .route("/api/swap/user/:address", get(get_user_orders))
        .route("/api/swap/:id", get(get_order))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("API bind failed: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.started_at.elapsed().as_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// EVM chains this relayer can deploy escrows on
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "chains": state.engine.supported_evm_chains() }))
}

/// Build a signable EVM-source order from a user intent
async fn build_evm_order(
    State(state): State<AppState>,
    Json(intent): Json<UserIntent>,
) -> Response {
    match state.engine.build_evm_to_cosmos(intent) {
        Ok(order) => ok(order),
        Err(e) => fail(e),
    }
}

/// Record a Cosmos-source order from a user intent
async fn build_cosmos_order(
    State(state): State<AppState>,
    Json(intent): Json<UserIntent>,
) -> Response {
    match state.engine.build_cosmos_to_evm(intent) {
        Ok(order) => ok(json!({ "orderHash": order.order_hash })),
        Err(e) => fail(e),
    }
}

/// Execute a signed EVM-source order: deploy the source escrow and
/// lock the destination HTLC
async fn execute_evm_order(
    State(state): State<AppState>,
    Json(req): Json<ExecuteSwapRequest>,
) -> Response {
    let order_hash = match parse_order_hash(&req.order_hash) {
        Ok(hash) => hash,
        Err(e) => return fail(e),
    };
    match state
        .engine
        .execute_evm_to_cosmos(order_hash, &req.signature)
        .await
    {
        Ok(_) => ok(json!({ "executed": true })),
        Err(e) => fail(e),
    }
}

/// Deploy the EVM destination escrow for a Cosmos-source order
async fn confirm_cosmos_order(
    State(state): State<AppState>,
    Json(req): Json<ConfirmSwapRequest>,
) -> Response {
    let order_hash = match parse_order_hash(&req.order_hash) {
        Ok(hash) => hash,
        Err(e) => return fail(e),
    };
    match state
        .engine
        .confirm_cosmos_to_evm(order_hash, req.src_cancellation_timestamp)
        .await
    {
        Ok(_) => ok(json!({ "executed": true })),
        Err(e) => fail(e),
    }
}

/// Reveal the maker's secret and withdraw from the EVM escrow
async fn reveal_secret(
    State(state): State<AppState>,
    Json(req): Json<RevealSecretRequest>,
) -> Response {
    let order_hash = match parse_order_hash(&req.order_hash) {
        Ok(hash) => hash,
        Err(e) => return fail(e),
    };
    match state.engine.reveal_secret(order_hash, &req.secret).await {
        Ok(order) => ok(order),
        Err(e) => fail(e),
    }
}

/// Look up one order by hash
async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let order_hash = match parse_order_hash(&id) {
        Ok(hash) => hash,
        Err(e) => return fail(e),
    };
    match state.engine.get_order(order_hash) {
        Ok(order) => ok(order),
        Err(e) => fail(e),
    }
}

/// All orders created by one maker address
async fn get_user_orders(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    let orders = state.engine.get_orders_by_user(&address);
    let total = orders.len();
    ok(json!({ "orders": orders, "totalOrders": total }))
}

fn parse_order_hash(input: &str) -> RelayerResult<H256> {
    codec::parse_hashlock(input)
        .map_err(|_| RelayerError::Validation(format!("invalid order hash: {}", input)))
}

fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

fn fail(err: RelayerError) -> Response {
    let status = if matches!(err, RelayerError::OrderNotFound { .. }) {
        StatusCode::NOT_FOUND
    } else if err.is_client_error() || matches!(err, RelayerError::BuildFailed(_)) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ApiResponse::<serde_json::Value> {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }),
    )
        .into_response()
}

// Request and response types

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteSwapRequest {
    order_hash: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmSwapRequest {
    order_hash: String,
    #[serde(default)]
    src_cancellation_timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevealSecretRequest {
    order_hash: String,
    secret: String,
}
