use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::queries;
use super::types::*;
use super::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse { error: msg.into() }),
    )
}

fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (limit.unwrap_or(100).clamp(1, 1000), offset.unwrap_or(0).max(0))
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    queries::get_health(&state.pool)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsResponse> {
    queries::get_stats(&state.pool)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn list_suspicious(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuspiciousParams>,
) -> ApiResult<SuspiciousResponse> {
    let (limit, offset) = clamp_page(params.limit, params.offset);
    queries::get_suspicious(&state.pool, params.severity.as_deref(), limit, offset)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn list_blacklist(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<BlacklistResponse> {
    let (limit, offset) = clamp_page(params.limit, params.offset);
    queries::get_blacklist(&state.pool, limit, offset)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PendingResponse> {
    let (limit, offset) = clamp_page(params.limit, params.offset);
    queries::get_pending(&state.pool, limit, offset)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<RulesResponse> {
    queries::get_rules(&state.pool)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn rule_violations(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<RuleViolationsResponse> {
    let (limit, offset) = clamp_page(params.limit, params.offset);
    match queries::get_rule_violations(&state.pool, &name, limit, offset).await {
        Ok(Some(response)) => Ok(Json(response)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("rule '{}' not found", name),
        )),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
