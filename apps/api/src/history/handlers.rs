//! Axum route handlers for the History API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::history::{self, HistoryVersion};
use crate::intake::caller::Caller;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HistoryListResponse {
    pub versions: Vec<HistoryVersion>,
}

/// GET /api/v1/reviews/history
pub async fn handle_list_history(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<HistoryListResponse>, AppError> {
    let versions = state.history.list(&caller.owner).await?;
    Ok(Json(HistoryListResponse { versions }))
}

/// GET /api/v1/reviews/history/:id
pub async fn handle_restore_version(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<HistoryVersion>, AppError> {
    let version = history::restore(state.history.as_ref(), id, &caller.owner).await?;
    Ok(Json(version))
}

/// DELETE /api/v1/reviews/history/:id
pub async fn handle_delete_version(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    history::remove(state.history.as_ref(), id, &caller.owner).await?;
    Ok(StatusCode::NO_CONTENT)
}
