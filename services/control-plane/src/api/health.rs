//! Probe endpoints.
//!
//! `/livez` and `/healthz` only prove the process is serving requests.
//! `/readyz` additionally reads from each kind's resource store and answers
//! 503 while any of them fails.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "unavailable".
    pub status: String,
    pub version: String,
    pub timestamp: String,

    /// Per-kind store errors; empty when every store answered.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub store_errors: BTreeMap<String, String>,
}

impl HealthResponse {
    fn new(store_errors: BTreeMap<String, String>) -> Self {
        let status = if store_errors.is_empty() { "ok" } else { "unavailable" };
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            store_errors,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse::new(BTreeMap::new()))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_errors: BTreeMap<String, String> = state
        .lifecycle()
        .probe_stores()
        .await
        .into_iter()
        .filter_map(|(kind, result)| result.err().map(|e| (kind.to_string(), e.to_string())))
        .collect();

    let code = if store_errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthResponse::new(store_errors)))
}

async fn livez() -> StatusCode {
    StatusCode::OK
}
