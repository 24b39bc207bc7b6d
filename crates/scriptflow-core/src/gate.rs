//! Progression gate: which steps are reachable and startable.
//!
//! Pure functions over a [`StepTracker`] snapshot. Step N unlocks only when
//! step N-1 is `completed`; step 1 is always unlocked.

use crate::error::{FlowError, Result};
use crate::pipeline;
use crate::tracker::StepTracker;
use crate::types::{StepNumber, StepStatus};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    /// Predecessor not completed.
    Locked,
    /// Unlocked and ready to start.
    Available,
    Processing,
    Completed,
    /// Last attempt failed; may be restarted.
    Failed,
    /// Last poll gave up; may be restarted.
    TimedOut,
}

impl Affordance {
    pub fn as_str(self) -> &'static str {
        match self {
            Affordance::Locked => "locked",
            Affordance::Available => "available",
            Affordance::Processing => "processing",
            Affordance::Completed => "completed",
            Affordance::Failed => "failed",
            Affordance::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for Affordance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_unlocked(tracker: &StepTracker, step: StepNumber) -> bool {
    match step.previous() {
        None => true,
        Some(prev) => tracker.is_completed(prev),
    }
}

pub fn affordance(tracker: &StepTracker, step: StepNumber) -> Affordance {
    match tracker.status(step) {
        Some(StepStatus::Completed) => Affordance::Completed,
        Some(StepStatus::Processing) => Affordance::Processing,
        _ if !is_unlocked(tracker, step) => Affordance::Locked,
        Some(StepStatus::Error) => Affordance::Failed,
        Some(StepStatus::TimedOut) => Affordance::TimedOut,
        Some(StepStatus::Pending) | None => Affordance::Available,
    }
}

pub fn can_start(tracker: &StepTracker, step: StepNumber) -> bool {
    check_start(tracker, step).is_ok()
}

/// Explain why a step cannot be started, if it cannot.
pub fn check_start(tracker: &StepTracker, step: StepNumber) -> Result<()> {
    match affordance(tracker, step) {
        Affordance::Available | Affordance::Failed | Affordance::TimedOut => Ok(()),
        Affordance::Locked => Err(FlowError::StepLocked {
            step: step.get(),
            prerequisite: step.previous().map(StepNumber::get).unwrap_or(1),
        }),
        Affordance::Processing | Affordance::Completed => Err(FlowError::StepNotStartable {
            step: step.get(),
            status: tracker
                .status(step)
                .map(|s| s.to_string())
                .unwrap_or_default(),
        }),
    }
}

/// The step a viewer should land on: the first step not yet completed.
pub fn active_step(tracker: &StepTracker) -> StepNumber {
    StepNumber::all()
        .iter()
        .copied()
        .find(|&s| !tracker.is_completed(s))
        .unwrap_or(StepNumber::OutlineGeneration)
}

#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub step_number: StepNumber,
    pub name: &'static str,
    pub result_key: &'static str,
    pub status: Option<StepStatus>,
    pub affordance: Affordance,
    pub unlocked: bool,
    pub can_start: bool,
    pub active: bool,
}

pub fn view(tracker: &StepTracker) -> Vec<StepView> {
    let active = active_step(tracker);
    StepNumber::all()
        .iter()
        .map(|&step| {
            let spec = pipeline::spec(step);
            StepView {
                step_number: step,
                name: spec.name,
                result_key: spec.result_key,
                status: tracker.status(step),
                affordance: affordance(tracker, step),
                unlocked: is_unlocked(tracker, step),
                can_start: can_start(tracker, step),
                active: step == active,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::ProjectStep;

    fn tracker(statuses: &[(StepNumber, StepStatus)]) -> StepTracker {
        StepTracker::from_steps(
            statuses
                .iter()
                .map(|&(n, status)| {
                    let mut s = ProjectStep::new("p1", n);
                    s.status = status;
                    s
                })
                .collect(),
        )
    }

    #[test]
    fn first_step_is_always_unlocked() {
        let t = StepTracker::default();
        assert!(is_unlocked(&t, StepNumber::TranscriptAnalysis));
        assert_eq!(
            affordance(&t, StepNumber::TranscriptAnalysis),
            Affordance::Available
        );
        assert!(can_start(&t, StepNumber::TranscriptAnalysis));
    }

    #[test]
    fn later_steps_need_completed_predecessor() {
        use StepStatus::*;
        for prev in [Pending, Processing, Error, TimedOut] {
            let t = tracker(&[(StepNumber::TranscriptAnalysis, prev)]);
            assert!(!can_start(&t, StepNumber::Research), "prev = {prev}");
            assert!(!can_start(&t, StepNumber::OutlineGeneration));
            assert_eq!(affordance(&t, StepNumber::Research), Affordance::Locked);
        }

        let t = tracker(&[(StepNumber::TranscriptAnalysis, Completed)]);
        assert!(can_start(&t, StepNumber::Research));
        assert!(!can_start(&t, StepNumber::OutlineGeneration));
    }

    #[test]
    fn check_start_names_the_prerequisite() {
        let t = StepTracker::default();
        match check_start(&t, StepNumber::OutlineGeneration) {
            Err(FlowError::StepLocked { step, prerequisite }) => {
                assert_eq!(step, 3);
                assert_eq!(prerequisite, 2);
            }
            other => panic!("expected StepLocked, got {other:?}"),
        }
    }

    #[test]
    fn processing_and_completed_steps_cannot_restart() {
        let t = tracker(&[
            (StepNumber::TranscriptAnalysis, StepStatus::Completed),
            (StepNumber::Research, StepStatus::Processing),
        ]);
        assert!(!can_start(&t, StepNumber::TranscriptAnalysis));
        assert!(matches!(
            check_start(&t, StepNumber::Research),
            Err(FlowError::StepNotStartable { .. })
        ));
    }

    #[test]
    fn failed_and_timed_out_steps_can_restart() {
        let t = tracker(&[
            (StepNumber::TranscriptAnalysis, StepStatus::Completed),
            (StepNumber::Research, StepStatus::TimedOut),
        ]);
        assert_eq!(affordance(&t, StepNumber::Research), Affordance::TimedOut);
        assert!(can_start(&t, StepNumber::Research));
    }

    #[test]
    fn view_marks_first_incomplete_step_active() {
        let t = tracker(&[(StepNumber::TranscriptAnalysis, StepStatus::Completed)]);
        let v = view(&t);
        assert_eq!(v.len(), 3);
        assert!(!v[0].active);
        assert!(v[1].active);
        assert!(v[1].can_start);
        assert!(!v[2].unlocked);
        assert_eq!(v[2].result_key, "outline");
    }

    #[test]
    fn fully_completed_pipeline_lands_on_last_step() {
        use StepStatus::Completed;
        let t = tracker(&[
            (StepNumber::TranscriptAnalysis, Completed),
            (StepNumber::Research, Completed),
            (StepNumber::OutlineGeneration, Completed),
        ]);
        assert_eq!(active_step(&t), StepNumber::OutlineGeneration);
    }
}
