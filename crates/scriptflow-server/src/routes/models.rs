use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/models: model catalog filtered to the pipeline's providers.
pub async fn list_models(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let models = app.catalog.fetch().await?;
    Ok(Json(serde_json::json!({ "models": models })))
}
