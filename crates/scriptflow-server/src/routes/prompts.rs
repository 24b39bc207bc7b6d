use axum::extract::{Path, Query, State};
use axum::Json;
use scriptflow_core::prompt::{Prompt, PromptEdit, PromptSort, PromptSortField};
use scriptflow_core::types::StepNumber;
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::identity::UserId;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SortParams {
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
}

impl SortParams {
    fn to_sort(&self) -> Result<PromptSort, AppError> {
        let field = match self.sort.as_deref() {
            Some(s) => s.parse::<PromptSortField>()?,
            None => PromptSortField::default(),
        };
        let descending = match self.dir.as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(AppError::bad_request(format!(
                    "invalid sort direction '{other}': expected asc or desc"
                )))
            }
        };
        Ok(PromptSort { field, descending })
    }
}

/// GET /api/prompts?sort=&dir=: active prompt per step.
pub async fn list_prompts(
    State(app): State<AppState>,
    Query(params): Query<SortParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let prompts = app.store.active_prompts(params.to_sort()?).await?;
    Ok(Json(serde_json::json!({ "prompts": prompts })))
}

/// GET /api/prompts/{n}
pub async fn get_prompt(
    State(app): State<AppState>,
    Path(n): Path<String>,
) -> Result<Json<Prompt>, AppError> {
    let step: StepNumber = n.parse()?;
    Ok(Json(app.store.active_prompt(step).await?))
}

/// PUT /api/prompts/{n}: save as a new active version.
pub async fn update_prompt(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path(n): Path<String>,
    Json(edit): Json<PromptEdit>,
) -> Result<Json<Prompt>, AppError> {
    let step: StepNumber = n.parse()?;
    edit.validate()?;
    let prompt = app.store.create_prompt_version(step, &edit).await?;
    info!(step = step.get(), version = prompt.version, user = %user, "prompt version created");
    Ok(Json(prompt))
}

/// GET /api/prompts/{n}/history: every version, newest first.
pub async fn prompt_history(
    State(app): State<AppState>,
    Path(n): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let step: StepNumber = n.parse()?;
    let versions = app.store.prompt_history(step).await?;
    Ok(Json(serde_json::json!({ "versions": versions })))
}
