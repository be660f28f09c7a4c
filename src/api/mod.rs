//! HTTP API for operations, health checks and transaction status

use crate::audit::AuditLog;
use crate::chain::ChainClient;
use crate::config::ServerConfig;
use crate::error::{ErrorPayload, OperatorError, OperatorResult};
use crate::ops::{OperationDispatcher, OperationOutput, OperationRequest};
use crate::tx::TransactionSubmitter;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::Address;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<OperationDispatcher>,
    pub client: Arc<dyn ChainClient>,
    pub submitter: Option<TransactionSubmitter>,
    pub audit: Option<Arc<AuditLog>>,
    pub api_token: Option<String>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/transactions/:id", get(get_transaction))
        .route("/operations", post(run_operation))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` resolves
pub async fn run_server(
    config: ServerConfig,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> OperatorResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OperatorError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| OperatorError::Internal(format!("API server failed: {}", e)))
}

/// Error response carrying the structured payload
struct ApiError(OperatorError);

impl From<OperatorError> for ApiError {
    fn from(e: OperatorError) -> Self {
        Self(e)
    }
}

fn status_for(error: &OperatorError) -> StatusCode {
    match error {
        OperatorError::InvalidParams(_) => StatusCode::BAD_REQUEST,
        OperatorError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
        OperatorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        OperatorError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
        OperatorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OperatorError::Unsettled { .. } => StatusCode::ACCEPTED,
        OperatorError::TransientNetwork { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OperatorError::Rpc { .. } => StatusCode::BAD_GATEWAY,
        OperatorError::Estimation(_)
        | OperatorError::OnChainRevert { .. }
        | OperatorError::GasCeiling(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OperatorError::NonceConflict { .. } | OperatorError::Abandoned { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let payload: ErrorPayload = self.0.to_payload();
        let retry_after = payload.retry_after_ms;

        let mut response = (status, Json(ErrorBody { error: payload })).into_response();
        if let Some(ms) = retry_after {
            let secs = ms.div_ceil(1_000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

fn check_token(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - node reachable and audit store healthy
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let block_number = state.client.block_number().await;
    let database = match &state.audit {
        Some(audit) => Some(audit.health_check().await.is_ok()),
        None => None,
    };

    let chain = block_number.is_ok();
    let ready = chain && database.unwrap_or(true);
    if !ready {
        warn!(chain, ?database, "Readiness check failed");
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            chain,
            database,
            block_number: block_number.ok(),
        }),
    )
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        chain_id: state.client.chain_id(),
        operator: state.dispatcher.operator_address(),
        write_enabled: state.dispatcher.write_enabled(),
        pending_transactions: state
            .submitter
            .as_ref()
            .map(|s| s.pending_count())
            .unwrap_or(0),
    })
}

/// Live record, else the audited copy once it has been pruned from memory
async fn get_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, Response> {
    check_token(&state, &headers).map_err(IntoResponse::into_response)?;

    let live = match &state.submitter {
        Some(submitter) => submitter.status(id),
        None => Err(OperatorError::TransactionNotFound {
            tx_id: id.to_string(),
        }),
    };

    match (live, &state.audit) {
        (Ok(record), _) => Ok(Json(record).into_response()),
        (Err(OperatorError::TransactionNotFound { .. }), Some(audit)) => {
            match audit.fetch(id).await {
                Ok(Some(entry)) => Ok(Json(entry).into_response()),
                Ok(None) => Err(ApiError(OperatorError::TransactionNotFound {
                    tx_id: id.to_string(),
                })
                .into_response()),
                Err(e) => Err(ApiError(e).into_response()),
            }
        }
        (Err(e), _) => Err(ApiError(e).into_response()),
    }
}

async fn run_operation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OperationRequest>,
) -> Result<Json<OperationOutput>, Response> {
    check_token(&state, &headers).map_err(IntoResponse::into_response)?;

    state
        .dispatcher
        .dispatch(request)
        .await
        .map(Json)
        .map_err(|e| ApiError(e).into_response())
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    chain: bool,
    /// Absent when no audit store is configured
    database: Option<bool>,
    block_number: Option<u64>,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    chain_id: u64,
    operator: Option<Address>,
    write_enabled: bool,
    pending_transactions: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorPayload,
}
