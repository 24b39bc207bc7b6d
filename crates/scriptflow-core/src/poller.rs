//! Completion polling for a triggered step.
//!
//! The loop is strictly sequential: sleep one interval, check the ceiling,
//! issue one read, repeat. A tick is always awaited to completion before the
//! next sleep starts, so reads never overlap. A failing read is logged and
//! the loop carries on.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::step::ProjectStep;
use crate::store::StepLookup;
use crate::types::StepNumber;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// A completed record was found.
    Resolved(ProjectStep),
    /// The ceiling elapsed without a completed record.
    Expired { ticks: u32 },
    Cancelled,
}

pub struct Poller<'a, L: ?Sized> {
    lookup: &'a L,
    clock: &'a dyn Clock,
    interval: Duration,
    ceiling: Duration,
}

impl<'a, L: StepLookup + ?Sized> Poller<'a, L> {
    pub fn new(lookup: &'a L, clock: &'a dyn Clock, config: PollingConfig) -> Self {
        Self {
            lookup,
            clock,
            interval: config.interval(),
            ceiling: config.ceiling(),
        }
    }

    pub async fn run(
        &self,
        project_id: &str,
        step: StepNumber,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let started = self.clock.now();
        let mut ticks = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(project = %project_id, step = step.get(), ticks, "poll cancelled");
                    return PollOutcome::Cancelled;
                }
                _ = self.clock.sleep(self.interval) => {}
            }

            if self.clock.now().saturating_sub(started) >= self.ceiling {
                warn!(
                    project = %project_id,
                    step = step.get(),
                    ticks,
                    ceiling_secs = self.ceiling.as_secs(),
                    "poll ceiling reached without a completed record"
                );
                return PollOutcome::Expired { ticks };
            }

            ticks += 1;
            match self.lookup.completed_step(project_id, step).await {
                Ok(Some(record)) => {
                    info!(project = %project_id, step = step.get(), ticks, "step completed");
                    return PollOutcome::Resolved(record);
                }
                Ok(None) => {
                    debug!(project = %project_id, step = step.get(), tick = ticks, "not completed yet");
                }
                Err(e) => {
                    warn!(project = %project_id, step = step.get(), tick = ticks, error = %e, "poll read failed");
                }
            }
        }
    }
}
