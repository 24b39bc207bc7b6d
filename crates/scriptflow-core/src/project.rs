use crate::error::{FlowError, Result};
use crate::tracker::StepTracker;
use crate::types::{ProjectStatus, StepNumber, StepStatus};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

fn youtube_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^https?://(www\.|m\.)?(youtube\.com/(watch\?(.*&)?v=|shorts/|embed/|live/)|youtu\.be/)[A-Za-z0-9_-]+",
        )
        .expect("valid regex")
    })
}

pub fn validate_youtube_url(url: &str) -> Result<()> {
    if youtube_re().is_match(url.trim()) {
        Ok(())
    } else {
        Err(FlowError::Validation(format!(
            "'{url}' is not a YouTube video URL"
        )))
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub youtube_url: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default = "StepNumber::first")]
    pub current_step: StepNumber,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(input: NewProject, created_by: impl Into<String>) -> Result<Self> {
        input.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            youtube_url: input.youtube_url.trim().to_string(),
            context: input.context,
            client_info: input.client_info.filter(|c| !c.trim().is_empty()),
            status: ProjectStatus::Draft,
            current_step: StepNumber::first(),
            created_by: created_by.into(),
            processing_started_at: None,
            processing_completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }

    /// Apply an edit made by the project's owner.
    pub fn apply(&mut self, update: ProjectUpdate) -> Result<()> {
        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(FlowError::Validation("title cannot be empty".into()));
            }
            self.title = title.trim().to_string();
        }
        if let Some(url) = update.youtube_url {
            validate_youtube_url(&url)?;
            self.youtube_url = url.trim().to_string();
        }
        if let Some(context) = update.context {
            self.context = context;
        }
        if let Some(client) = update.client_info {
            self.client_info = Some(client).filter(|c| !c.trim().is_empty());
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Derive lifecycle status and current step from the tracker snapshot.
    ///
    /// Returns `true` if anything changed.
    pub fn sync_progress(&mut self, tracker: &StepTracker) -> bool {
        let started = StepNumber::all()
            .iter()
            .any(|&s| tracker.status(s).is_some_and(|st| st != StepStatus::Pending));
        let current = StepNumber::all()
            .iter()
            .copied()
            .find(|&s| tracker.status(s) != Some(StepStatus::Completed));

        let (status, current_step) = match current {
            None => (ProjectStatus::Completed, StepNumber::OutlineGeneration),
            Some(step) if started => (ProjectStatus::InProgress, step),
            Some(step) => (ProjectStatus::Draft, step),
        };

        if status == self.status && current_step == self.current_step {
            return false;
        }

        let now = Utc::now();
        if status != ProjectStatus::Draft && self.processing_started_at.is_none() {
            self.processing_started_at = Some(now);
        }
        if status == ProjectStatus::Completed {
            self.processing_completed_at = Some(now);
        }
        self.status = status;
        self.current_step = current_step;
        self.updated_at = now;
        true
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub youtube_url: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub client_info: Option<String>,
}

impl NewProject {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(FlowError::Validation("title cannot be empty".into()));
        }
        validate_youtube_url(&self.youtube_url)
    }
}

/// Editable project fields. `None` leaves a field untouched; an empty
/// `client_info` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub client_info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::ProjectStep;

    fn sample() -> Project {
        Project::new(
            NewProject {
                title: "Launch video".into(),
                youtube_url: "https://youtu.be/abc".into(),
                context: "demo".into(),
                client_info: Some("Acme".into()),
            },
            "u1",
        )
        .unwrap()
    }

    #[test]
    fn youtube_urls_are_validated() {
        assert!(validate_youtube_url("https://youtu.be/abc").is_ok());
        assert!(validate_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
        assert!(validate_youtube_url("https://youtube.com/shorts/xyz_1").is_ok());
        assert!(validate_youtube_url("https://vimeo.com/123").is_err());
        assert!(validate_youtube_url("youtu.be/abc").is_err());
    }

    #[test]
    fn new_project_starts_as_draft_at_step_one() {
        let p = sample();
        assert_eq!(p.status, ProjectStatus::Draft);
        assert_eq!(p.current_step, StepNumber::TranscriptAnalysis);
        assert!(p.is_owned_by("u1"));
        assert!(!p.is_owned_by("u2"));
    }

    #[test]
    fn new_project_rejects_blank_title() {
        let err = Project::new(
            NewProject {
                title: "  ".into(),
                youtube_url: "https://youtu.be/abc".into(),
                ..Default::default()
            },
            "u1",
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn apply_clears_client_info_with_empty_string() {
        let mut p = sample();
        p.apply(ProjectUpdate {
            client_info: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(p.client_info, None);
    }

    #[test]
    fn sync_progress_follows_completed_steps() {
        let mut p = sample();
        let mut tracker = StepTracker::default();
        assert!(!p.sync_progress(&tracker));

        let mut step = ProjectStep::new(&p.id, StepNumber::TranscriptAnalysis);
        step.status = StepStatus::Processing;
        tracker.merge(step.clone());
        assert!(p.sync_progress(&tracker));
        assert_eq!(p.status, ProjectStatus::InProgress);
        assert_eq!(p.current_step, StepNumber::TranscriptAnalysis);
        assert!(p.processing_started_at.is_some());

        for s in StepNumber::all() {
            let mut done = ProjectStep::new(&p.id, *s);
            done.status = StepStatus::Completed;
            tracker.merge(done);
        }
        assert!(p.sync_progress(&tracker));
        assert_eq!(p.status, ProjectStatus::Completed);
        assert!(p.processing_completed_at.is_some());
    }
}
