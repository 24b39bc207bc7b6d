//! Trigger-and-poll coordination for one pipeline step.
//!
//! A run moves `Idle → Triggered → Polling → Resolved | Expired`. The gate is
//! checked and the (project, step) pair claimed before anything goes out; a
//! trigger that fails or is not acknowledged with `success: true` returns the
//! pair to `Idle` without polling. On resolution the completed record is merged
//! into the caller's tracker and the project's progress is saved. On expiry
//! the step is read one last time and, if still not completed, persisted as
//! `timed_out`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::error::{FlowError, Result};
use crate::gate;
use crate::pipeline::{self, StepContext};
use crate::poller::{PollOutcome, Poller};
use crate::project::Project;
use crate::registry::{RunGuard, RunRegistry};
use crate::step::{ProjectStep, StepWrite};
use crate::store::Datastore;
use crate::tracker::StepTracker;
use crate::types::{PollPhase, StepNumber, StepStatus};
use crate::webhook::Trigger;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "step", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed(ProjectStep),
    TimedOut(ProjectStep),
    Cancelled,
}

pub struct Coordinator {
    store: Arc<dyn Datastore>,
    trigger: Arc<dyn Trigger>,
    clock: Arc<dyn Clock>,
    polling: PollingConfig,
    registry: RunRegistry,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Datastore>,
        trigger: Arc<dyn Trigger>,
        clock: Arc<dyn Clock>,
        polling: PollingConfig,
    ) -> Self {
        Self {
            store,
            trigger,
            clock,
            polling,
            registry: RunRegistry::new(),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Check the gate and claim the (project, step) pair.
    pub fn begin(&self, project: &Project, tracker: &StepTracker, step: StepNumber) -> Result<RunGuard> {
        gate::check_start(tracker, step)?;
        self.registry.begin(&project.id, step)
    }

    /// Claim a step that is already `processing` without triggering it again,
    /// e.g. after a restart lost the original poll.
    pub fn begin_resume(&self, project: &Project, tracker: &StepTracker, step: StepNumber) -> Result<RunGuard> {
        if tracker.status(step) != Some(StepStatus::Processing) {
            return Err(FlowError::StepNotStartable {
                step: step.get(),
                status: tracker.status(step).map(|s| s.to_string()).unwrap_or_default(),
            });
        }
        self.registry.begin(&project.id, step)
    }

    /// Trigger, then poll until resolution, expiry or cancellation.
    pub async fn run_step(
        &self,
        user_id: &str,
        project: &mut Project,
        tracker: &mut StepTracker,
        step: StepNumber,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let guard = self.begin(project, tracker, step)?;
        self.drive(guard, user_id, project, tracker, step, cancel).await
    }

    /// Trigger and poll for a pair already claimed with [`Coordinator::begin`].
    pub async fn drive(
        &self,
        guard: RunGuard,
        user_id: &str,
        project: &mut Project,
        tracker: &mut StepTracker,
        step: StepNumber,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let spec = pipeline::spec(step);
        let payload = spec.payload(&StepContext { project, user_id });

        info!(project = %project.id, step = step.get(), path = %spec.trigger_path(), "triggering step");
        let ack = match self.trigger.trigger(spec, &payload).await {
            Ok(ack) => ack,
            Err(e) => {
                guard.advance(PollPhase::Idle)?;
                warn!(project = %project.id, step = step.get(), error = %e, "trigger failed");
                return Err(e);
            }
        };
        if ack.get("success").and_then(Value::as_bool) != Some(true) {
            guard.advance(PollPhase::Idle)?;
            let message = ack
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("webhook did not acknowledge the request")
                .to_string();
            warn!(project = %project.id, step = step.get(), message = %message, "trigger rejected");
            return Err(FlowError::TriggerRejected(message));
        }

        guard.advance(PollPhase::Polling)?;
        self.mark_processing(user_id, &project.id, tracker, step).await;

        self.poll(guard, user_id, project, tracker, step, cancel).await
    }

    /// Poll a pair whose external job is already running.
    pub async fn resume(
        &self,
        guard: RunGuard,
        user_id: &str,
        project: &mut Project,
        tracker: &mut StepTracker,
        step: StepNumber,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        guard.advance(PollPhase::Polling)?;
        info!(project = %project.id, step = step.get(), "resuming poll");
        self.poll(guard, user_id, project, tracker, step, cancel).await
    }

    async fn poll(
        &self,
        guard: RunGuard,
        user_id: &str,
        project: &mut Project,
        tracker: &mut StepTracker,
        step: StepNumber,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let poller = Poller::new(self.store.as_ref(), self.clock.as_ref(), self.polling);
        match poller.run(&project.id, step, cancel).await {
            PollOutcome::Resolved(record) => self.resolve(guard, user_id, project, tracker, record).await,
            PollOutcome::Expired { ticks } => {
                // The ceiling is checked before each read, so a completion
                // written during the last interval has not been seen yet.
                if let Some(record) = self.late_completion(&project.id, step).await {
                    return self.resolve(guard, user_id, project, tracker, record).await;
                }
                match self.mark_timed_out(user_id, &project.id, tracker, step).await {
                    Ok(record) => {
                        guard.advance(PollPhase::Expired)?;
                        warn!(project = %project.id, step = step.get(), ticks, "step timed out");
                        Ok(StepOutcome::TimedOut(record))
                    }
                    Err(FlowError::InvalidTransition { from, to }) => {
                        match self.late_completion(&project.id, step).await {
                            Some(record) => self.resolve(guard, user_id, project, tracker, record).await,
                            None => {
                                guard.advance(PollPhase::Idle)?;
                                Err(FlowError::InvalidTransition { from, to })
                            }
                        }
                    }
                    Err(e) => {
                        guard.advance(PollPhase::Idle)?;
                        Err(e)
                    }
                }
            }
            PollOutcome::Cancelled => {
                guard.advance(PollPhase::Idle)?;
                Ok(StepOutcome::Cancelled)
            }
        }
    }

    /// Merge a completed record and save the project's progress. The project
    /// is re-read first so edits made while the poll ran are kept.
    async fn resolve(
        &self,
        guard: RunGuard,
        user_id: &str,
        project: &mut Project,
        tracker: &mut StepTracker,
        record: ProjectStep,
    ) -> Result<StepOutcome> {
        guard.advance(PollPhase::Resolved)?;
        tracker.merge(record.clone());
        let mut fresh = self.store.get_project(&project.id, user_id).await?;
        if fresh.sync_progress(tracker) {
            self.store.save_project(&fresh, user_id).await?;
        }
        *project = fresh;
        info!(project = %project.id, step = record.step_number.get(), "step resolved");
        Ok(StepOutcome::Completed(record))
    }

    async fn late_completion(&self, project_id: &str, step: StepNumber) -> Option<ProjectStep> {
        match self.store.completed_step(project_id, step).await {
            Ok(record) => record,
            Err(e) => {
                warn!(project = %project_id, step = step.get(), error = %e, "final poll read failed");
                None
            }
        }
    }

    /// Optimistically record the step as processing, locally and in the
    /// store. The automation service may already have written a later status;
    /// in that case the store keeps its row.
    async fn mark_processing(
        &self,
        user_id: &str,
        project_id: &str,
        tracker: &mut StepTracker,
        step: StepNumber,
    ) {
        let write = StepWrite {
            updated_by: Some(user_id.to_string()),
            ..StepWrite::status(StepStatus::Processing)
        };
        match self.store.write_step(project_id, step, write).await {
            Ok(row) => {
                tracker.merge(row);
            }
            Err(e) => {
                warn!(project = %project_id, step = step.get(), error = %e, "could not persist processing status");
                let mut local = tracker
                    .get(step)
                    .cloned()
                    .unwrap_or_else(|| ProjectStep::new(project_id, step));
                if local.transition(StepStatus::Processing).is_ok() {
                    tracker.merge(local);
                }
            }
        }
    }

    async fn mark_timed_out(
        &self,
        user_id: &str,
        project_id: &str,
        tracker: &mut StepTracker,
        step: StepNumber,
    ) -> Result<ProjectStep> {
        let write = StepWrite {
            error_message: Some(format!(
                "No result after {} seconds",
                self.polling.ceiling_secs
            )),
            updated_by: Some(user_id.to_string()),
            ..StepWrite::status(StepStatus::TimedOut)
        };
        let row = self.store.write_step(project_id, step, write).await?;
        tracker.merge(row.clone());
        Ok(row)
    }
}
