//! Backup record endpoints.

use appz_id::BackupId;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use super::parse_id;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{backup_id}", get(get_backup))
        .route("/{backup_id}/restore", post(restore_backup))
}

/// GET /v1/backups/{backup_id}
async fn get_backup(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(backup_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let backup_id: BackupId = parse_id(&backup_id, "backup", &ctx.request_id)?;
    let record = state
        .store()
        .get_backup(backup_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(record))
}

/// POST /v1/backups/{backup_id}/restore
///
/// Stamps `last_restore_at` on the record once the restore succeeded.
async fn restore_backup(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(backup_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let backup_id: BackupId = parse_id(&backup_id, "backup", &request_id)?;

    let outcome = state
        .backups()
        .restore(backup_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    if outcome.success {
        let mut record = state
            .store()
            .get_backup(backup_id)
            .await
            .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
        record.last_restore_at = Some(Utc::now());
        state
            .store()
            .save_backup(&record)
            .await
            .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    }
    Ok(Json(outcome))
}
