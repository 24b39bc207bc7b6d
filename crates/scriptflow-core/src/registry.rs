//! In-process registry of trigger-and-poll sessions.
//!
//! At most one active session exists per (project, step). Starting a second
//! one fails with `StepAlreadyRunning` until the first has resolved, expired
//! or returned to idle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{FlowError, Result};
use crate::types::{PollPhase, StepNumber};

type RunKey = (String, StepNumber);

#[derive(Clone, Default)]
pub struct RunRegistry {
    /// Last phase per pair. Terminal phases stay so run status can still be
    /// reported after a run ends; one entry per (project, step) ever run in
    /// this process, at most three per project.
    phases: Arc<Mutex<HashMap<RunKey, PollPhase>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunKey, PollPhase>> {
        self.phases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the (project, step) pair and move it to `Triggered`.
    pub fn begin(&self, project_id: &str, step: StepNumber) -> Result<RunGuard> {
        let key = (project_id.to_string(), step);
        let mut phases = self.lock();
        let current = phases.get(&key).copied().unwrap_or_default();
        if current.is_active() {
            return Err(FlowError::StepAlreadyRunning {
                project: project_id.to_string(),
                step: step.get(),
            });
        }
        phases.insert(key.clone(), PollPhase::Triggered);
        debug!(project = %project_id, step = step.get(), from = %current, "run started");
        Ok(RunGuard {
            registry: self.clone(),
            key,
        })
    }

    pub fn phase(&self, project_id: &str, step: StepNumber) -> PollPhase {
        self.lock()
            .get(&(project_id.to_string(), step))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_active(&self, project_id: &str, step: StepNumber) -> bool {
        self.phase(project_id, step).is_active()
    }
}

/// Ownership of one active session. Dropping the guard while the session is
/// still active returns it to `Idle`, so an aborted task never leaves the
/// pair locked.
pub struct RunGuard {
    registry: RunRegistry,
    key: RunKey,
}

impl RunGuard {
    pub fn phase(&self) -> PollPhase {
        self.registry
            .lock()
            .get(&self.key)
            .copied()
            .unwrap_or_default()
    }

    pub fn advance(&self, target: PollPhase) -> Result<()> {
        let mut phases = self.registry.lock();
        let current = phases.get(&self.key).copied().unwrap_or_default();
        if !current.can_transition_to(target) {
            return Err(FlowError::InvalidTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }
        phases.insert(self.key.clone(), target);
        Ok(())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut phases = self.registry.lock();
        if let Some(phase) = phases.get_mut(&self.key) {
            if phase.is_active() {
                *phase = PollPhase::Idle;
            }
        }
    }
}
