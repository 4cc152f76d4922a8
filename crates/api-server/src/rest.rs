//! REST API handlers for allocation scoring, model diagnostics and
//! operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use mmm_core::error::MmmError;
use mmm_core::types::{AllocationRequest, AllocationResponse, ModelDiagnostics};
use mmm_model::{FittedModel, ModelRegistry};
use mmm_planner::{AllocationBreakdown, AllocationScorer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub start_time: Instant,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Fetch the cached model, training it off the async runtime if this is the
/// first access.
async fn model(state: &AppState) -> Result<Arc<FittedModel>, (StatusCode, Json<ErrorResponse>)> {
    if let Some(model) = state.registry.cached() {
        return Ok(model);
    }
    let registry = state.registry.clone();
    tokio::task::spawn_blocking(move || registry.current())
        .await
        .map_err(|e| error_response(anyhow::Error::from(e).into()))?
        .map_err(error_response)
}

/// Map a domain error onto a status code and JSON body.
pub fn error_response(err: MmmError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        MmmError::BudgetExceeded { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "budget_exceeded"),
        MmmError::InvalidAllocation(_) => (StatusCode::BAD_REQUEST, "invalid_allocation"),
        MmmError::ShapeMismatch { .. } => (StatusCode::BAD_REQUEST, "shape_mismatch"),
        MmmError::MissingInput { .. }
        | MmmError::SchemaMismatch { .. }
        | MmmError::InvalidRecord { .. }
        | MmmError::EmptyTrainingSet
        | MmmError::DegenerateInput { .. } => (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    if status.is_server_error() {
        error!(error = %err, "Request failed");
        metrics::counter!("api.errors").increment(1);
    } else {
        metrics::counter!("api.validation_errors").increment(1);
    }

    let overage = match &err {
        MmmError::BudgetExceeded { overage } => Some(*overage),
        _ => None,
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "Internal processing error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
            overage,
        }),
    )
}

/// POST /v1/allocations/score: Predicted revenue for a candidate allocation.
pub async fn score_allocation(
    State(state): State<AppState>,
    Json(request): Json<AllocationRequest>,
) -> ApiResult<AllocationResponse> {
    let model = model(&state).await?;
    match AllocationScorer::new(&model).score(&request) {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            if e.is_recoverable() {
                warn!(error = %e, "Allocation rejected");
            }
            Err(error_response(e))
        }
    }
}

/// POST /v1/allocations/breakdown: Per-channel ROI table.
pub async fn allocation_breakdown(
    State(state): State<AppState>,
    Json(request): Json<AllocationRequest>,
) -> ApiResult<AllocationBreakdown> {
    let model = model(&state).await?;
    AllocationBreakdown::compute(&model, &request)
        .map(Json)
        .map_err(error_response)
}

/// GET /v1/model/diagnostics: Coefficients and fit quality.
pub async fn model_diagnostics(State(state): State<AppState>) -> ApiResult<ModelDiagnostics> {
    let model = model(&state).await?;
    Ok(Json(model.diagnostics()))
}

/// POST /v1/model/retrain: Reload the persisted tables and refit.
pub async fn retrain_model(State(state): State<AppState>) -> ApiResult<RetrainResponse> {
    let registry = state.registry.clone();
    let model = tokio::task::spawn_blocking(move || registry.retrain())
        .await
        .map_err(|e| error_response(anyhow::Error::from(e).into()))?
        .map_err(error_response)?;

    let generation = state.registry.generation();
    info!(generation = generation, run_id = %model.run_id(), "Retrain requested over HTTP");

    Ok(Json(RetrainResponse {
        generation,
        diagnostics: model.diagnostics(),
    }))
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_ready: state.registry.is_ready(),
        model_generation: state.registry.generation(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe.
/// Returns 200 only once a model is cached.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.registry.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overage: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrainResponse {
    pub generation: u64,
    pub diagnostics: ModelDiagnostics,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_ready: bool,
    pub model_generation: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use mmm_core::error::MmmResult;
    use mmm_core::types::{ChannelRow, TrainingRow, TrainingSet};
    use mmm_model::RidgeRegression;

    fn training_set() -> MmmResult<TrainingSet> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = [([100.0, 0.0], 500.0), ([0.0, 100.0], 300.0), ([50.0, 50.0], 400.0)];
        Ok(TrainingSet {
            channels: ["A", "B"]
                .iter()
                .enumerate()
                .map(|(i, n)| ChannelRow {
                    channel_id: i as u32 + 1,
                    channel_name: n.to_string(),
                })
                .collect(),
            rows: rows
                .iter()
                .enumerate()
                .map(|(i, (spend, revenue))| TrainingRow {
                    date_key: start + Duration::weeks(i as i64),
                    spend: spend.to_vec(),
                    revenue: *revenue,
                })
                .collect(),
        })
    }

    fn state() -> AppState {
        AppState {
            registry: Arc::new(ModelRegistry::new(
                training_set,
                RidgeRegression::new(1.0).unwrap(),
            )),
            start_time: Instant::now(),
        }
    }

    fn request(budget: f64, allocations: &[(&str, f64)]) -> AllocationRequest {
        AllocationRequest {
            total_budget: budget,
            allocations: allocations
                .iter()
                .map(|(n, a)| (n.to_string(), *a))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_readiness_follows_model_cache() {
        let state = state();
        assert_eq!(readiness(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        model_diagnostics(State(state.clone())).await.unwrap();
        assert_eq!(readiness(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_score_under_budget() {
        let Json(response) = score_allocation(
            State(state()),
            Json(request(1000.0, &[("A", 400.0), ("B", 400.0)])),
        )
        .await
        .unwrap();
        assert_eq!(response.unallocated_amount, Some(200.0));
    }

    #[tokio::test]
    async fn test_score_over_budget_is_unprocessable() {
        let (status, Json(body)) = score_allocation(
            State(state()),
            Json(request(1000.0, &[("A", 600.0), ("B", 500.0)])),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error, "budget_exceeded");
        assert_eq!(body.overage, Some(100.0));
    }

    #[tokio::test]
    async fn test_negative_allocation_is_bad_request() {
        let (status, Json(body)) =
            score_allocation(State(state()), Json(request(1000.0, &[("A", -1.0)])))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.overage, None);
    }

    #[tokio::test]
    async fn test_retrain_bumps_generation() {
        let state = state();
        model_diagnostics(State(state.clone())).await.unwrap();
        let Json(body) = retrain_model(State(state.clone())).await.unwrap();
        assert_eq!(body.generation, 2);
        assert_eq!(body.diagnostics.channel_count, 2);
    }

    #[tokio::test]
    async fn test_breakdown_lists_channels() {
        let Json(breakdown) = allocation_breakdown(
            State(state()),
            Json(request(500.0, &[("A", 250.0), ("B", 250.0)])),
        )
        .await
        .unwrap();
        assert_eq!(breakdown.channels.len(), 2);
        assert!(breakdown.channels[0].positive);
    }

    #[test]
    fn test_training_failure_maps_to_unavailable() {
        let (status, Json(body)) = error_response(MmmError::EmptyTrainingSet);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error, "model_unavailable");
    }
}
