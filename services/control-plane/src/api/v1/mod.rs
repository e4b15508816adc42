//! API v1 routes.

mod backups;
mod capacity;
mod hosts;
mod templates;
mod workloads;

use std::str::FromStr;

use axum::Router;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/hosts", hosts::routes())
        .nest("/templates", templates::routes())
        .nest("/workloads", workloads::routes())
        .nest("/backups", backups::routes())
        .nest("/capacity", capacity::routes())
}

/// Parse a typed id from a path segment.
fn parse_id<T: FromStr>(raw: &str, kind: &str, request_id: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request(format!("invalid_{kind}_id"), format!("Invalid {kind} ID format"))
            .with_request_id(request_id.to_string())
    })
}
