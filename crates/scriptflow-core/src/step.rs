use crate::error::{FlowError, Result};
use crate::pipeline;
use crate::types::{StepNumber, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ProjectStep
// ---------------------------------------------------------------------------

/// One row of the `project_steps` table: the state and output of a single
/// pipeline step for a project. Keyed by `(project_id, step_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStep {
    pub id: String,
    pub project_id: String,
    pub step_number: StepNumber,
    pub step_name: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Seconds spent by the automation service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectStep {
    pub fn new(project_id: impl Into<String>, step: StepNumber) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            step_number: step,
            step_name: pipeline::spec(step).name.to_string(),
            status: StepStatus::Pending,
            step_data: None,
            raw_response: None,
            error_message: None,
            processing_time: None,
            processing_cost: None,
            model_used: None,
            started_at: None,
            completed_at: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, target: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(FlowError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        let now = Utc::now();
        if target == StepStatus::Processing && self.status != StepStatus::Processing {
            self.started_at = Some(now);
            self.completed_at = None;
            self.error_message = None;
        }
        if target.is_terminal() && !self.status.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// Apply a write from the automation service. The status change must be
    /// a legal forward transition; other fields overwrite when present.
    pub fn apply_write(&mut self, write: StepWrite) -> Result<()> {
        self.transition(write.status)?;
        if let Some(data) = write.step_data {
            self.step_data = Some(data);
        }
        if let Some(raw) = write.raw_response {
            self.raw_response = Some(raw);
        }
        if let Some(msg) = write.error_message {
            self.error_message = Some(msg);
        }
        if let Some(t) = write.processing_time {
            self.processing_time = Some(t);
        }
        if let Some(c) = write.processing_cost {
            self.processing_cost = Some(c);
        }
        if let Some(m) = write.model_used {
            self.model_used = Some(m);
        }
        if let Some(by) = write.updated_by {
            self.updated_by = Some(by);
        }
        Ok(())
    }

    /// The raw result text as written by the automation service.
    pub fn result_text(&self) -> Option<&str> {
        self.raw_response.as_deref()
    }

    /// Parse the raw response as JSON. Outline results are markdown, so this
    /// returns `None` for them as well as for unparseable text.
    pub fn result_json(&self) -> Option<serde_json::Value> {
        if pipeline::spec(self.step_number).markdown_result {
            return None;
        }
        self.raw_response
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .or_else(|| self.step_data.clone())
    }
}

// ---------------------------------------------------------------------------
// StepWrite
// ---------------------------------------------------------------------------

/// A status/result write to a step record, as performed by the automation
/// service against the datastore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepWrite {
    pub status: StepStatus,
    #[serde(default)]
    pub step_data: Option<serde_json::Value>,
    #[serde(default)]
    pub raw_response: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub processing_cost: Option<f64>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl StepWrite {
    pub fn status(status: StepStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_step_is_pending_with_pipeline_name() {
        let step = ProjectStep::new("p1", StepNumber::Research);
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.step_name, "Research");
    }

    #[test]
    fn transition_stamps_timestamps() {
        let mut step = ProjectStep::new("p1", StepNumber::TranscriptAnalysis);
        step.transition(StepStatus::Processing).unwrap();
        assert!(step.started_at.is_some());
        assert!(step.completed_at.is_none());
        step.transition(StepStatus::Completed).unwrap();
        assert!(step.completed_at.is_some());
    }

    #[test]
    fn completed_step_cannot_regress() {
        let mut step = ProjectStep::new("p1", StepNumber::TranscriptAnalysis);
        step.transition(StepStatus::Processing).unwrap();
        step.transition(StepStatus::Completed).unwrap();
        let err = step.transition(StepStatus::Processing).unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { .. }));
        assert_eq!(step.status, StepStatus::Completed);
    }

    #[test]
    fn apply_write_merges_result_fields() {
        let mut step = ProjectStep::new("p1", StepNumber::Research);
        step.apply_write(StepWrite::status(StepStatus::Processing))
            .unwrap();
        step.apply_write(StepWrite {
            status: StepStatus::Completed,
            raw_response: Some(r#"{"topics":["a","b"]}"#.into()),
            processing_cost: Some(0.0123),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(step.processing_cost, Some(0.0123));
        assert_eq!(
            step.result_json().unwrap()["topics"],
            serde_json::json!(["a", "b"])
        );
    }

    #[test]
    fn outline_result_is_markdown_not_json() {
        let mut step = ProjectStep::new("p1", StepNumber::OutlineGeneration);
        step.raw_response = Some("# Outline\n\n- intro".into());
        assert!(step.result_json().is_none());
        assert_eq!(step.result_text(), Some("# Outline\n\n- intro"));
    }
}
