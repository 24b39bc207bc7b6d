use crate::step::ProjectStep;
use crate::types::{StepNumber, StepStatus};
use serde::{Deserialize, Serialize};

/// In-memory snapshot of a project's step records, ordered by step number
/// with at most one record per step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepTracker {
    steps: Vec<ProjectStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    Replaced,
}

impl StepTracker {
    /// Build a snapshot from datastore rows. If the rows contain more than one
    /// record for a step, the most recently updated one wins.
    pub fn from_steps(rows: Vec<ProjectStep>) -> Self {
        let mut tracker = Self::default();
        for row in rows {
            match tracker.get(row.step_number) {
                Some(existing) if existing.updated_at > row.updated_at => {}
                _ => {
                    tracker.merge(row);
                }
            }
        }
        tracker
    }

    pub fn get(&self, step: StepNumber) -> Option<&ProjectStep> {
        self.steps.iter().find(|s| s.step_number == step)
    }

    pub fn status(&self, step: StepNumber) -> Option<StepStatus> {
        self.get(step).map(|s| s.status)
    }

    pub fn is_completed(&self, step: StepNumber) -> bool {
        self.status(step) == Some(StepStatus::Completed)
    }

    /// Replace the record for the step number or insert it in order.
    pub fn merge(&mut self, step: ProjectStep) -> Merge {
        if let Some(existing) = self
            .steps
            .iter_mut()
            .find(|s| s.step_number == step.step_number)
        {
            *existing = step;
            return Merge::Replaced;
        }
        let pos = self
            .steps
            .iter()
            .position(|s| s.step_number > step.step_number)
            .unwrap_or(self.steps.len());
        self.steps.insert(pos, step);
        Merge::Inserted
    }

    /// Steps whose status implies an outstanding poll.
    pub fn processing(&self) -> impl Iterator<Item = StepNumber> + '_ {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Processing)
            .map(|s| s.step_number)
    }

    pub fn steps(&self) -> &[ProjectStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn step(n: StepNumber, status: StepStatus) -> ProjectStep {
        let mut s = ProjectStep::new("p1", n);
        s.status = status;
        s
    }

    #[test]
    fn merge_keeps_step_order_and_never_duplicates() {
        let mut t = StepTracker::default();
        assert_eq!(
            t.merge(step(StepNumber::OutlineGeneration, StepStatus::Pending)),
            Merge::Inserted
        );
        assert_eq!(
            t.merge(step(StepNumber::TranscriptAnalysis, StepStatus::Completed)),
            Merge::Inserted
        );
        assert_eq!(
            t.merge(step(StepNumber::Research, StepStatus::Processing)),
            Merge::Inserted
        );
        assert_eq!(
            t.merge(step(StepNumber::Research, StepStatus::Completed)),
            Merge::Replaced
        );

        let order: Vec<u8> = t.steps().iter().map(|s| s.step_number.get()).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.status(StepNumber::Research), Some(StepStatus::Completed));
    }

    #[test]
    fn from_steps_prefers_latest_duplicate() {
        let mut older = step(StepNumber::TranscriptAnalysis, StepStatus::Processing);
        older.updated_at = Utc::now() - Duration::minutes(5);
        let newer = step(StepNumber::TranscriptAnalysis, StepStatus::Completed);

        let t = StepTracker::from_steps(vec![newer.clone(), older.clone()]);
        assert_eq!(t.len(), 1);
        assert!(t.is_completed(StepNumber::TranscriptAnalysis));

        let t = StepTracker::from_steps(vec![older, newer]);
        assert!(t.is_completed(StepNumber::TranscriptAnalysis));
    }

    #[test]
    fn processing_lists_outstanding_steps() {
        let t = StepTracker::from_steps(vec![
            step(StepNumber::TranscriptAnalysis, StepStatus::Completed),
            step(StepNumber::Research, StepStatus::Processing),
        ]);
        let pending: Vec<_> = t.processing().collect();
        assert_eq!(pending, vec![StepNumber::Research]);
        assert_eq!(t.status(StepNumber::OutlineGeneration), None);
    }
}
