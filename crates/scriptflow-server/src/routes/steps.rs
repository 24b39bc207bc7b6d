use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use scriptflow_core::coordinator::StepOutcome;
use scriptflow_core::error::FlowError;
use scriptflow_core::gate;
use scriptflow_core::pipeline;
use scriptflow_core::step::{ProjectStep, StepWrite};
use scriptflow_core::tracker::StepTracker;
use scriptflow_core::types::{PollPhase, StepNumber, StepStatus};
use tracing::{error, info};

use crate::error::AppError;
use crate::identity::UserId;
use crate::state::{AppState, RunEvent};

fn parse_step(raw: &str) -> Result<StepNumber, AppError> {
    Ok(raw.parse::<StepNumber>()?)
}

/// GET /api/projects/{id}/steps: tracker snapshot with affordances.
pub async fn list_steps(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.store.get_project(&id, &user).await?;
    let tracker = StepTracker::from_steps(app.store.list_steps(&id).await?);
    Ok(Json(serde_json::json!({
        "steps": tracker,
        "gate": gate::view(&tracker),
    })))
}

/// PUT /api/projects/{id}/steps/{n}: status/result write from the
/// automation service. Regressions are refused with 422.
pub async fn write_step(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path((id, n)): Path<(String, String)>,
    Json(mut body): Json<StepWrite>,
) -> Result<Json<ProjectStep>, AppError> {
    let step = parse_step(&n)?;
    let mut project = app.store.get_project(&id, &user).await?;
    if body.updated_by.is_none() {
        body.updated_by = Some(user.clone());
    }
    let row = app.store.write_step(&id, step, body).await?;
    info!(project = %id, step = step.get(), status = %row.status, "step written");

    let tracker = StepTracker::from_steps(app.store.list_steps(&id).await?);
    if project.sync_progress(&tracker) {
        app.store.save_project(&project, &user).await?;
    }
    Ok(Json(row))
}

/// POST /api/projects/{id}/steps/{n}/run: trigger the step and poll for its
/// completion in the background. A step already `processing` with no live
/// poll is resumed without a second trigger.
pub async fn start_run(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path((id, n)): Path<(String, String)>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let step = parse_step(&n)?;
    let mut project = app.store.get_project(&id, &user).await?;
    let mut tracker = StepTracker::from_steps(app.store.list_steps(&id).await?);

    let coordinator = app.coordinator.clone();
    let resuming = tracker.status(step) == Some(StepStatus::Processing)
        && !coordinator.registry().is_active(&id, step);
    let guard = if resuming {
        coordinator.begin_resume(&project, &tracker, step)?
    } else {
        coordinator.begin(&project, &tracker, step)?
    };
    // Dropping the guard on this early return releases the claim.
    if !resuming {
        let spec = pipeline::spec(step);
        if !app.forwarder.is_configured(spec) {
            return Err(FlowError::WebhookNotConfigured(spec.not_configured_message.into()).into());
        }
    }
    let phase = guard.phase();

    app.emit(RunEvent {
        project_id: id.clone(),
        step,
        phase,
        status: None,
        message: None,
    });

    let state = app.clone();
    let cancel = app.shutdown.child_token();
    tokio::spawn(async move {
        let result = if resuming {
            coordinator
                .resume(guard, &user, &mut project, &mut tracker, step, &cancel)
                .await
        } else {
            coordinator
                .drive(guard, &user, &mut project, &mut tracker, step, &cancel)
                .await
        };
        let phase = coordinator.registry().phase(&project.id, step);
        let event = match result {
            Ok(StepOutcome::Completed(row)) | Ok(StepOutcome::TimedOut(row)) => RunEvent {
                project_id: project.id.clone(),
                step,
                phase,
                status: Some(row.status),
                message: row.error_message,
            },
            Ok(StepOutcome::Cancelled) => RunEvent {
                project_id: project.id.clone(),
                step,
                phase,
                status: None,
                message: Some("cancelled".into()),
            },
            Err(e) => {
                error!(project = %project.id, step = step.get(), error = %e, "run failed");
                RunEvent {
                    project_id: project.id.clone(),
                    step,
                    phase,
                    status: None,
                    message: Some(e.to_string()),
                }
            }
        };
        state.emit(event);
    });

    info!(project = %id, step = step.get(), resuming, "run started");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "project_id": id,
            "step": step,
            "phase": phase,
            "resumed": resuming,
        })),
    ))
}

/// GET /api/projects/{id}/steps/{n}/run: current poll phase.
pub async fn get_run(
    State(app): State<AppState>,
    UserId(user): UserId,
    Path((id, n)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let step = parse_step(&n)?;
    app.store.get_project(&id, &user).await?;
    let phase: PollPhase = app.coordinator.registry().phase(&id, step);
    let record = app.store.get_step(&id, step).await?;
    Ok(Json(serde_json::json!({
        "project_id": id,
        "step": step,
        "phase": phase,
        "active": phase.is_active(),
        "status": record.map(|r| r.status),
    })))
}
