use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use scriptflow_core::pipeline;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{AppError, WebhookError};
use crate::state::AppState;

/// POST /api/webhook/{slug}: forward the body to the step's automation
/// webhook and relay its JSON reply. Failures, including a body that is not
/// JSON, answer 500 `{ success: false, message }`.
pub async fn forward(
    State(app): State<AppState>,
    Path(slug): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(spec) = pipeline::by_slug(&slug) else {
        return AppError::not_found(format!("unknown webhook '{slug}'")).into_response();
    };
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(slug = %slug, error = %rejection.body_text(), "rejected webhook request body");
            return WebhookError(format!("Invalid request body: {}", rejection.body_text())).into_response();
        }
    };
    info!(step = spec.number.get(), slug = %slug, "webhook proxy request");
    match app.forwarder.forward(spec, &body).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => WebhookError::from(e).into_response(),
    }
}
