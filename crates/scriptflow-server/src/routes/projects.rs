use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use scriptflow_core::gate;
use scriptflow_core::project::{NewProject, Project, ProjectUpdate};
use scriptflow_core::tracker::StepTracker;
use tracing::info;

use crate::error::AppError;
use crate::identity::UserId;
use crate::state::AppState;

/// GET /api/projects: the caller's projects, newest first.
pub async fn list_projects(
    State(app): State<AppState>,
    UserId(user): UserId,
) -> Result<Json<serde_json::Value>, AppError> {
    let projects = app.store.list_projects(&user).await?;
    Ok(Json(serde_json::json!({ "projects": projects })))
}

/// POST /api/projects
pub async fn create_project(
    State(app): State<AppState>,
    UserId(user): UserId,
    Json(body): Json<NewProject>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = Project::new(body, &user)?;
    app.store.insert_project(&project).await?;
    info!(project = %project.id, user = %user, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects/{id}: project, step records and gate view.
pub async fn get_project(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project = app.store.get_project(&id, &user).await?;
    let tracker = StepTracker::from_steps(app.store.list_steps(&id).await?);
    Ok(Json(serde_json::json!({
        "project": project,
        "steps": tracker,
        "gate": gate::view(&tracker),
        "active_step": gate::active_step(&tracker),
    })))
}

/// PATCH /api/projects/{id}
pub async fn update_project(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    Json(body): Json<ProjectUpdate>,
) -> Result<Json<Project>, AppError> {
    let mut project = app.store.get_project(&id, &user).await?;
    project.apply(body)?;
    app.store.save_project(&project, &user).await?;
    Ok(Json(project))
}

/// DELETE /api/projects/{id}: acknowledgement only; deletion itself is
/// performed by the owner against the datastore.
pub async fn delete_project(Path(id): Path<String>) -> Json<serde_json::Value> {
    info!(project = %id, "project deletion acknowledged");
    Json(serde_json::json!({
        "success": true,
        "message": format!("Project {id} deletion acknowledged"),
    }))
}
