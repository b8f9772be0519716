use crate::auth::{AuthRouterExt, ADMIN_ROLE};
use crate::entities::{email_log, email_template};
use crate::errors::ApiError;
use crate::handlers::common::{success_response, validate_input};
use crate::services::notifications::{RenderedPreview, UpsertTemplateInput};
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Email template administration, mounted under `/admin/emails`
pub fn notifications_routes() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates))
        .route("/templates/:key", get(get_template).put(upsert_template))
        .route("/templates/:key/preview", post(preview_template))
        .route("/templates/:key/test", post(send_test_email))
        .route("/logs", get(recent_logs))
        .with_role(ADMIN_ROLE)
}

pub async fn list_templates(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let templates: Vec<email_template::Model> = state.services.email.list_templates().await?;
    Ok(success_response(templates))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let template = state.services.email.get_template(&key).await?;
    Ok(success_response(template))
}

/// Create or replace a template
#[utoipa::path(
    put,
    path = "/api/v1/admin/emails/templates/{key}",
    params(("key" = String, Path, description = "Template key, e.g. order_confirmation")),
    request_body = UpsertTemplateInput,
    responses(
        (status = 200, description = "Template stored", body = ApiResponse<email_template::Model>),
        (status = 400, description = "Empty subject or body", body = crate::errors::ErrorResponse),
    ),
    tag = "Notifications"
)]
pub async fn upsert_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<UpsertTemplateInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let template = state.services.email.upsert_template(&key, payload).await?;
    Ok(success_response(template))
}

/// Render a template with sample variables
#[utoipa::path(
    post,
    path = "/api/v1/admin/emails/templates/{key}/preview",
    params(("key" = String, Path, description = "Template key")),
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Rendered template", body = ApiResponse<RenderedPreview>),
        (status = 400, description = "A placeholder has no value", body = crate::errors::ErrorResponse),
    ),
    tag = "Notifications"
)]
pub async fn preview_template(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<PreviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let preview = state.services.email.preview(&key, &payload.vars).await?;
    Ok(success_response(preview))
}

pub async fn send_test_email(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<TestEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let log: email_log::Model = state
        .services
        .email
        .send(&payload.to, &key, &payload.vars)
        .await?;
    Ok(success_response(log))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    pub limit: Option<u64>,
}

pub async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let logs = state.services.email.recent_logs(limit).await?;
    Ok(success_response(logs))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PreviewRequest {
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TestEmailRequest {
    #[validate(email)]
    pub to: String,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}
