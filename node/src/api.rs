//! # REST + JSON-RPC API
//!
//! The axum router for the node's HTTP interface. Reads go straight to the
//! in-memory vault; the only write path is relaying agent-signed batches,
//! which are persisted before the response is sent.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                          |
//! |--------|----------------------|--------------------------------------|
//! | GET    | `/health`            | Liveness check                       |
//! | GET    | `/status`            | Vault summary                        |
//! | GET    | `/assets`            | Asset registry                       |
//! | GET    | `/rebalance`         | Allocation drift report              |
//! | GET    | `/shares/:address`   | Share balance and batch nonce        |
//! | GET    | `/operations/:key`   | Cross-chain operation record         |
//! | GET    | `/events`            | Event journal (`?since=&limit=`)     |
//! | POST   | `/batch`             | Relay a signed batch                 |
//! | POST   | `/rpc`               | JSON-RPC 2.0 gateway                 |

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tessera_protocol::storage::{StoreError, VaultStore};
use tessera_protocol::vault::{
    Address, AssetId, BatchReceipt, CallContext, ErrorCategory, InMemoryHost, OperationKey,
    SignedBatch, Vault, VaultError,
};

use crate::metrics::SharedMetrics;

/// Cap on events returned by one `/events` request.
const MAX_EVENTS_PER_PAGE: usize = 1_000;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

pub type SharedVault = Arc<Mutex<Vault<InMemoryHost>>>;

/// Shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub vault: SharedVault,
    pub store: VaultStore,
    /// Identity the node relays batches under.
    pub relayer: Address,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/assets", get(assets_handler))
        .route("/rebalance", get(rebalance_handler))
        .route("/shares/:address", get(shares_handler))
        .route("/operations/:key", get(operation_handler))
        .route("/events", get(events_handler))
        .route("/batch", post(batch_handler))
        .route("/rpc", post(rpc_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by REST endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub category: Option<ErrorCategory>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                category: None,
            },
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }
}

/// HTTP status for each error category.
pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Economic => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::External => StatusCode::BAD_GATEWAY,
        ErrorCategory::State => StatusCode::CONFLICT,
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let category = err.category();
        Self {
            status: status_for(category),
            body: ErrorResponse {
                error: err.to_string(),
                category: Some(category),
            },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("storage error: {err}"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn parse_hex<T>(what: &str, raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = hex::FromHexError>,
{
    raw.parse()
        .map_err(|e| ApiError::bad_request(format!("invalid {what} {raw:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub name: String,
    pub vault: Address,
    pub owner: Address,
    pub primary_agent: Address,
    pub paused: bool,
    pub active_assets: usize,
    pub total_value: u128,
    pub total_supply: u128,
    /// Scaled by 1e18.
    pub nav_per_share: u128,
    pub needs_rebalancing: bool,
    pub last_event: u64,
    pub timestamp: String,
}

/// `GET /shares/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShareResponse {
    pub address: Address,
    pub shares: u128,
    pub nonce: u64,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
    pub limit: Option<usize>,
}

fn status(state: &AppState) -> Result<StatusResponse, VaultError> {
    let vault = state.vault.lock();
    let s = vault.state();
    Ok(StatusResponse {
        version: state.version.clone(),
        name: s.config.name.clone(),
        vault: vault.address(),
        owner: s.access.owner(),
        primary_agent: s.access.primary_agent(),
        paused: s.access.is_paused(),
        active_assets: s.assets.active_count(),
        total_value: vault.total_value()?,
        total_supply: vault.total_supply(),
        nav_per_share: vault.nav_per_share()?,
        needs_rebalancing: vault.needs_rebalancing()?,
        last_event: s.events.last_sequence(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Relaying
// ---------------------------------------------------------------------------

/// Execute a signed batch and persist the result. If the save fails the
/// in-memory vault is put back, so memory never runs ahead of disk.
pub fn relay_batch(state: &AppState, batch: &SignedBatch) -> Result<BatchReceipt, ApiError> {
    let timer = state.metrics.batch_latency_seconds.start_timer();
    let ctx = CallContext::new(state.relayer, Utc::now());
    let mut vault = state.vault.lock();
    let checkpoint = vault.clone();

    let receipt = match vault.execute_signed_batch(&ctx, batch) {
        Ok(receipt) => receipt,
        Err(err) => {
            state.metrics.batches_rejected_total.inc();
            tracing::warn!(signer = %batch.signer_address(), nonce = batch.nonce, error = %err, "batch refused");
            return Err(err.into());
        }
    };
    if let Err(err) = state.store.save(&*vault) {
        *vault = checkpoint;
        state.metrics.batches_rejected_total.inc();
        tracing::error!(error = %err, "failed to persist batch, rolled back");
        return Err(err.into());
    }

    state.metrics.record_receipt(&receipt);
    state.metrics.observe_vault(&*vault);
    timer.observe_duration();
    tracing::info!(
        signer = %batch.signer_address(),
        nonce = receipt.nonce,
        succeeded = receipt.success_count,
        gas_used = receipt.gas_used,
        "batch relayed"
    );
    Ok(receipt)
}

// ---------------------------------------------------------------------------
// REST Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Liveness only; `/status` reports vault state.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(status(&state)?))
}

async fn assets_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.vault.lock().assets().to_vec())
}

async fn rebalance_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.vault.lock().rebalance_report()?;
    Ok(Json(report))
}

async fn shares_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ShareResponse>, ApiError> {
    let address: Address = parse_hex("address", &address)?;
    let vault = state.vault.lock();
    Ok(Json(ShareResponse {
        address,
        shares: vault.share_balance(&address),
        nonce: vault.nonce(&address),
    }))
}

async fn operation_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let key: OperationKey = parse_hex("operation key", &key)?;
    let vault = state.vault.lock();
    vault
        .operation(&key)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("operation not found: {key}")))
}

async fn events_handler(
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(MAX_EVENTS_PER_PAGE)
        .min(MAX_EVENTS_PER_PAGE);
    let vault = state.vault.lock();
    let events: Vec<_> = vault
        .events_since(query.since)
        .iter()
        .take(limit)
        .cloned()
        .collect();
    Json(events)
}

async fn batch_handler(
    State(state): State<AppState>,
    Json(batch): Json<SignedBatch>,
) -> Result<Json<BatchReceipt>, ApiError> {
    Ok(Json(relay_batch(&state, &batch)?))
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    /// Positional parameters.
    pub params: Option<Value>,
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const RPC_INVALID_REQUEST: i32 = -32600;
pub const RPC_METHOD_NOT_FOUND: i32 = -32601;
pub const RPC_INVALID_PARAMS: i32 = -32602;
pub const RPC_INTERNAL: i32 = -32603;
/// A vault call was refused; `data.category` says why.
pub const RPC_VAULT_ERROR: i32 = -32000;
pub const RPC_NOT_FOUND: i32 = -32001;

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<VaultError> for JsonRpcError {
    fn from(err: VaultError) -> Self {
        Self {
            code: RPC_VAULT_ERROR,
            message: err.to_string(),
            data: Some(serde_json::json!({ "category": err.category() })),
        }
    }
}

impl From<ApiError> for JsonRpcError {
    fn from(err: ApiError) -> Self {
        let code = match err.body.category {
            Some(_) => RPC_VAULT_ERROR,
            None => RPC_INTERNAL,
        };
        Self {
            code,
            message: err.body.error,
            data: err
                .body
                .category
                .map(|c| serde_json::json!({ "category": c })),
        }
    }
}

fn params<T: DeserializeOwned>(req: &JsonRpcRequest) -> Result<T, JsonRpcError> {
    let raw = req.params.clone().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(raw)
        .map_err(|e| JsonRpcError::new(RPC_INVALID_PARAMS, format!("Invalid params: {e}")))
}

fn to_result<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(RPC_INTERNAL, e.to_string()))
}

fn dispatch(state: &AppState, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    match req.method.as_str() {
        "tessera_version" => to_result(&state.version),
        "tessera_status" => to_result(status(state)?),
        "tessera_totalValue" => to_result(state.vault.lock().total_value()?),
        "tessera_navPerShare" => to_result(state.vault.lock().nav_per_share()?),
        "tessera_shareBalance" => {
            let (address,): (Address,) = params(req)?;
            to_result(state.vault.lock().share_balance(&address))
        }
        "tessera_nonce" => {
            let (address,): (Address,) = params(req)?;
            to_result(state.vault.lock().nonce(&address))
        }
        "tessera_previewDeposit" => {
            let (asset, amount): (AssetId, u128) = params(req)?;
            to_result(state.vault.lock().preview_deposit(&asset, amount)?)
        }
        "tessera_previewWithdraw" => {
            let (shares, asset): (u128, AssetId) = params(req)?;
            to_result(state.vault.lock().preview_withdraw(shares, &asset)?)
        }
        "tessera_previewFees" => to_result(state.vault.lock().preview_fees(Utc::now())?),
        "tessera_rebalanceReport" => to_result(state.vault.lock().rebalance_report()?),
        "tessera_getOperation" => {
            let (key,): (OperationKey,) = params(req)?;
            let record = state.vault.lock().operation(&key).cloned();
            match record {
                Some(record) => to_result(record),
                None => Err(JsonRpcError::new(
                    RPC_NOT_FOUND,
                    format!("Operation not found: {key}"),
                )),
            }
        }
        "tessera_submitBatch" => {
            let (batch,): (SignedBatch,) = params(req)?;
            to_result(relay_batch(state, &batch)?)
        }
        other => Err(JsonRpcError::new(
            RPC_METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

/// `POST /rpc`. Always HTTP 200; failures travel in the error object.
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let outcome = if req.jsonrpc != "2.0" {
        Err(JsonRpcError::new(
            RPC_INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        ))
    } else {
        dispatch(&state, &req)
    };
    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err)),
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
