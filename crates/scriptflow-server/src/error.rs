use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scriptflow_core::error::FlowError;
use scriptflow_core::webhook::ForwardError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 404s outside the core error enum
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for REST responses
// ---------------------------------------------------------------------------

/// Unified error type for REST responses. Body shape: `{ "error": message }`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(FlowError::Validation(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    pub fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.downcast_ref::<FlowError>() {
            Some(e) => flow_status(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn flow_status(e: &FlowError) -> StatusCode {
    match e {
        FlowError::ProjectNotFound(_)
        | FlowError::StepNotFound { .. }
        | FlowError::PromptNotFound(_) => StatusCode::NOT_FOUND,
        FlowError::InvalidStep(_)
        | FlowError::InvalidStatus(_)
        | FlowError::InvalidProjectStatus(_)
        | FlowError::Validation(_) => StatusCode::BAD_REQUEST,
        FlowError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::StepLocked { .. }
        | FlowError::StepNotStartable { .. }
        | FlowError::StepAlreadyRunning { .. } => StatusCode::CONFLICT,
        FlowError::Unauthenticated => StatusCode::UNAUTHORIZED,
        FlowError::TriggerRejected(_) | FlowError::Upstream(_) | FlowError::Catalog(_) => {
            StatusCode::BAD_GATEWAY
        }
        FlowError::Datastore(_) => StatusCode::SERVICE_UNAVAILABLE,
        FlowError::WebhookNotConfigured(_)
        | FlowError::Io(_)
        | FlowError::Yaml(_)
        | FlowError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

// ---------------------------------------------------------------------------
// WebhookError: proxy routes flatten every failure to a 500
// ---------------------------------------------------------------------------

/// Failure body of the `/api/webhook/*` routes: `{ success: false, message }`.
#[derive(Debug)]
pub struct WebhookError(pub String);

impl From<ForwardError> for WebhookError {
    fn from(e: ForwardError) -> Self {
        Self(e.to_string())
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "success": false, "message": self.0 });
        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
    }
}
