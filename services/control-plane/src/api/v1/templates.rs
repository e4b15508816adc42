//! Template API endpoints.

use appz_id::TemplateId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::parse_id;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{Footprint, Template, TemplateStatus};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/{template_id}", get(get_template).put(update_template))
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    #[serde(default)]
    pub status: Option<TemplateStatus>,
    #[serde(default)]
    pub topology: Option<String>,
    pub min: Footprint,
    pub recommended: Footprint,
    #[serde(default)]
    pub healthcheck_path: Option<String>,
    pub app_port: u16,
    #[serde(default)]
    pub backup_script: Option<String>,
    #[serde(default)]
    pub restore_script: Option<String>,
}

impl TemplateRequest {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.app_port == 0 {
            return Err("app_port must be non-zero".to_string());
        }
        for (field, f) in [("min", &self.min), ("recommended", &self.recommended)] {
            if f.ram_mb < 0.0 || f.cpu_cores < 0.0 || f.storage_gb < 0.0 {
                return Err(format!("{field} must not be negative"));
            }
        }
        if self.topology.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err("topology must not be empty".to_string());
        }
        Ok(())
    }

    fn apply(self, template: &mut Template) {
        template.name = self.name.trim().to_ascii_lowercase();
        template.status = self.status.unwrap_or(template.status);
        template.topology = self.topology;
        template.min = self.min;
        template.recommended = self.recommended;
        if let Some(path) = self.healthcheck_path {
            template.healthcheck_path = path;
        }
        template.app_port = self.app_port;
        template.backup_script = self.backup_script;
        template.restore_script = self.restore_script;
    }
}

/// POST /v1/templates
async fn create_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<TemplateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|msg| ApiError::bad_request("invalid_input", msg).with_request_id(ctx.request_id.clone()))?;

    let mut template = Template::new(req.name.clone(), req.min, req.recommended, req.app_port);
    req.apply(&mut template);
    state
        .store()
        .save_template(&template)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// PUT /v1/templates/{template_id}
///
/// Tested templates are frozen.
async fn update_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(template_id): Path<String>,
    Json(req): Json<TemplateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let template_id: TemplateId = parse_id(&template_id, "template", &request_id)?;
    req.validate()
        .map_err(|msg| ApiError::bad_request("invalid_input", msg).with_request_id(request_id.clone()))?;

    let mut template = state
        .store()
        .get_template(template_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    if !template.is_mutable() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "template_frozen",
            format!("Template {template_id} is tested and can no longer change"),
        )
        .with_request_id(request_id));
    }

    req.apply(&mut template);
    state
        .store()
        .save_template(&template)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok(Json(template))
}

/// GET /v1/templates
async fn list_templates(State(state): State<AppState>, ctx: RequestContext) -> Result<impl IntoResponse, ApiError> {
    let templates = state
        .store()
        .list_templates()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(templates))
}

/// GET /v1/templates/{template_id}
async fn get_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(template_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let template_id: TemplateId = parse_id(&template_id, "template", &ctx.request_id)?;
    let template = state
        .store()
        .get_template(template_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(template))
}
