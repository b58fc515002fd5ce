//! HTTP API server for the HLV node.
//!
//! Inbound triggers (create, cancel, rebalance) and the read-only query
//! surface over the swap service. Asynchronous progress is only visible by
//! polling the swap.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hlv_core::{SwapId, SwapStatus};
use hlv_engine::{
    CreateSwapRequest, EngineError, ErrorClass, RebalanceRequest, SwapReceipt, SwapService,
    SwapView,
};
use hlv_ledger::{SwapFilter, TransitionRecord};
use hlv_scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Shared state accessible from HTTP handlers.
pub struct ApiState {
    pub service: SwapService,
    pub scheduler: Arc<Scheduler>,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(service: SwapService, scheduler: Arc<Scheduler>) -> Self {
        Self {
            service,
            scheduler,
            start_time: Instant::now(),
        }
    }
}

// --- Response types ---

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub jobs_queued: usize,
    pub jobs_leased: usize,
    pub jobs_dead: usize,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub class: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub user: Option<String>,
    /// Comma-separated statuses.
    pub status: Option<String>,
    pub limit: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: EngineError) -> ApiError {
    let class = err.class();
    let status = match (&err, class) {
        (EngineError::NotFound(_), _) => StatusCode::NOT_FOUND,
        (_, ErrorClass::Validation) => StatusCode::BAD_REQUEST,
        (_, ErrorClass::Precondition) => StatusCode::CONFLICT,
        (_, ErrorClass::TransientProvider) | (_, ErrorClass::PartialExecution) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            class: class.to_string(),
        }),
    )
}

fn parse_swap_id(raw: &str) -> Result<SwapId, ApiError> {
    raw.parse::<SwapId>()
        .map_err(|e| error_response(EngineError::from(e)))
}

impl ListQuery {
    fn into_filter(self) -> Result<SwapFilter, ApiError> {
        let statuses = match self.status.as_deref() {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<SwapStatus>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| error_response(EngineError::from(e)))?,
            None => Vec::new(),
        };
        Ok(SwapFilter {
            user_address: self.user,
            statuses,
            limit: self.limit,
            ..SwapFilter::default()
        })
    }
}

// --- Handlers ---

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn handle_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let stats = state.scheduler.stats();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        jobs_queued: stats.queued,
        jobs_leased: stats.leased,
        jobs_dead: stats.dead,
    })
}

async fn handle_create_swap(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateSwapRequest>,
) -> Result<(StatusCode, Json<SwapReceipt>), ApiError> {
    let receipt = state.service.create_swap(req).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn handle_list_swaps(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SwapView>>, ApiError> {
    let filter = query.into_filter()?;
    let swaps = state.service.list_swaps(filter).await.map_err(error_response)?;
    Ok(Json(swaps.iter().map(SwapView::from).collect()))
}

async fn handle_get_swap(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<SwapView>, ApiError> {
    let swap_id = parse_swap_id(&id)?;
    let swap = state.service.get_swap(swap_id).await.map_err(error_response)?;
    Ok(Json(SwapView::from(&swap)))
}

async fn handle_transitions(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransitionRecord>>, ApiError> {
    let swap_id = parse_swap_id(&id)?;
    let log = state.service.transitions(swap_id).await.map_err(error_response)?;
    Ok(Json(log))
}

async fn handle_cancel_swap(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<SwapReceipt>, ApiError> {
    let swap_id = parse_swap_id(&id)?;
    let swap = state.service.cancel_swap(swap_id).await.map_err(error_response)?;
    Ok(Json(SwapReceipt::from(&swap)))
}

async fn handle_rebalance(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RebalanceRequest>,
) -> Result<(StatusCode, Json<SwapReceipt>), ApiError> {
    let receipt = state.service.rebalance(req).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

// --- Server ---

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/swaps", post(handle_create_swap).get(handle_list_swaps))
        .route("/api/v1/swaps/{id}", get(handle_get_swap))
        .route("/api/v1/swaps/{id}/transitions", get(handle_transitions))
        .route("/api/v1/swaps/{id}/cancel", post(handle_cancel_swap))
        .route("/api/v1/rebalance", post(handle_rebalance))
        .with_state(state)
}
