//! Agent HTTP API.
//!
//! - `GET /ping` answers `{"message":"pong"}`
//! - `POST /{action}` runs a lifecycle action and answers `{"msg":"ok"}`,
//!   or `{"error": ...}` with 400 for bad requests and 500 when fetching or
//!   running the script failed

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hostpilot_model::{Action, AgentActionRequest, AgentErrorReply, AgentReply};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::actions::{ActionError, ActionHandler};

/// Error body returned by the agent.
#[derive(Debug)]
pub struct AgentApiError {
    status: StatusCode,
    message: String,
}

impl AgentApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ActionError> for AgentApiError {
    fn from(err: ActionError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for AgentApiError {
    fn into_response(self) -> Response {
        let body = AgentErrorReply {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn router(handler: Arc<ActionHandler>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/{action}", post(do_action))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

async fn do_action(
    State(handler): State<Arc<ActionHandler>>,
    Path(action): Path<String>,
    body: Result<Json<AgentActionRequest>, JsonRejection>,
) -> Result<Json<AgentReply>, AgentApiError> {
    let action: Action = action
        .parse()
        .map_err(|_| AgentApiError::bad_request(format!("action can't be {action}")))?;
    let Json(request) = body.map_err(|e| AgentApiError::bad_request(e.body_text()))?;

    handler.handle(action, &request).await.map_err(|e| {
        warn!(action = %action, name = %request.name, error = %e, "Action failed");
        AgentApiError::from(e)
    })?;

    Ok(Json(AgentReply {
        msg: "ok".to_string(),
    }))
}
