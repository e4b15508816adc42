//! Host class recommendations for a planned mix.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::capacity::advisor::{MixEntry, Recommendation};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/recommend", post(recommend))
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub mix: Vec<MixEntry>,
}

/// POST /v1/capacity/recommend
async fn recommend(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RecommendRequest>,
) -> Result<Json<Recommendation>, ApiError> {
    if req.mix.iter().all(|entry| entry.count == 0) {
        return Err(ApiError::bad_request("invalid_input", "mix must request at least one instance")
            .with_request_id(ctx.request_id));
    }
    Ok(Json(state.advisor().recommend_host_class(&req.mix)))
}
