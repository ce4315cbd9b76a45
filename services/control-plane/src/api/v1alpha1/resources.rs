//! Application resource endpoints.
//!
//! `create`, `status` and `check` are static path segments, which is why
//! they are reserved as resource names.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use hostpilot_model::{ApplicationResource, ExpectRequest, HealthReport, Kind, ResourceStatus};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{kind}/create", post(create_resource))
        .route("/{kind}/status/changed/{date}", get(changed_resources))
        .route("/{kind}/{name}", delete(delete_resource))
        .route("/{kind}/{name}/status", get(get_status))
        .route("/{kind}/{name}/check", put(report_health))
        .route("/{kind}/{name}/{status}", put(request_status))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub name: String,
    pub status: ResourceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub name: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangedResponse {
    pub date: String,
    pub names: Vec<String>,
}

fn parse_kind(raw: &str) -> Result<Kind, ApiError> {
    raw.parse()
        .map_err(|e: hostpilot_model::ParseError| ApiError::bad_request("invalid_kind", e.to_string()))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request("invalid_body", rejection.body_text())
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /apis/v1alpha1/{kind}/create
async fn create_resource(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<ApplicationResource>, JsonRejection>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let Json(resource) = body.map_err(bad_body)?;

    let created = state.lifecycle().create_resource(kind, resource).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// PUT /apis/v1alpha1/{kind}/{name}/{status}
async fn request_status(
    State(state): State<AppState>,
    Path((kind, name, status)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let request: ExpectRequest = status
        .parse()
        .map_err(|e: hostpilot_model::ParseError| ApiError::bad_request("invalid_status", e.to_string()))?;

    let status = state
        .lifecycle()
        .request_status(kind, &name, request)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { name, status })).into_response())
}

/// GET /apis/v1alpha1/{kind}/{name}/status
async fn get_status(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let status = state.lifecycle().get_status(kind, &name).await?;
    Ok(Json(StatusResponse { name, status }))
}

/// DELETE /apis/v1alpha1/{kind}/{name}
async fn delete_resource(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let deleted = state.lifecycle().delete_resource(kind, &name).await?;
    Ok(Json(DeleteResponse { name, deleted }))
}

/// PUT /apis/v1alpha1/{kind}/{name}/check
///
/// Health reports from agents.
async fn report_health(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    body: Result<Json<HealthReport>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    let Json(report) = body.map_err(bad_body)?;

    state.lifecycle().report_health(kind, &name, report).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /apis/v1alpha1/{kind}/status/changed/{date}
async fn changed_resources(
    State(state): State<AppState>,
    Path((kind, date)): Path<(String, String)>,
) -> Result<Json<ChangedResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let names = state.lifecycle().changed_since(kind, &date).await?;
    Ok(Json(ChangedResponse { date, names }))
}
