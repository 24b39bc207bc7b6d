use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FlowError;

// ---------------------------------------------------------------------------
// StepNumber
// ---------------------------------------------------------------------------

/// One stage of the fixed three-stage pipeline.
///
/// Serialized as its integer number (1, 2 or 3) to match the `step_number`
/// column of the datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StepNumber {
    TranscriptAnalysis = 1,
    Research = 2,
    OutlineGeneration = 3,
}

impl StepNumber {
    pub fn all() -> &'static [StepNumber] {
        &[
            StepNumber::TranscriptAnalysis,
            StepNumber::Research,
            StepNumber::OutlineGeneration,
        ]
    }

    pub fn get(self) -> u8 {
        self as u8
    }

    pub fn first() -> StepNumber {
        StepNumber::TranscriptAnalysis
    }

    pub fn previous(self) -> Option<StepNumber> {
        match self {
            StepNumber::TranscriptAnalysis => None,
            StepNumber::Research => Some(StepNumber::TranscriptAnalysis),
            StepNumber::OutlineGeneration => Some(StepNumber::Research),
        }
    }

    pub fn next(self) -> Option<StepNumber> {
        match self {
            StepNumber::TranscriptAnalysis => Some(StepNumber::Research),
            StepNumber::Research => Some(StepNumber::OutlineGeneration),
            StepNumber::OutlineGeneration => None,
        }
    }
}

impl TryFrom<u8> for StepNumber {
    type Error = FlowError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(StepNumber::TranscriptAnalysis),
            2 => Ok(StepNumber::Research),
            3 => Ok(StepNumber::OutlineGeneration),
            _ => Err(FlowError::InvalidStep(n.to_string())),
        }
    }
}

impl From<StepNumber> for u8 {
    fn from(step: StepNumber) -> u8 {
        step.get()
    }
}

impl fmt::Display for StepNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl std::str::FromStr for StepNumber {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| FlowError::InvalidStep(s.to_string()))?;
        StepNumber::try_from(n)
    }
}

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Status of a single `ProjectStep` record.
///
/// Forward-only: `Pending → Processing → Completed | Error | TimedOut`.
/// A timed-out step may still be completed (or failed) by a late write from
/// the automation service, and a failed or timed-out step may be restarted,
/// which begins a new attempt in `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
    TimedOut,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
            StepStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Error | StepStatus::TimedOut
        )
    }

    pub fn can_transition_to(self, target: StepStatus) -> bool {
        use StepStatus::*;
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Pending, Processing | Completed | Error)
                | (Processing, Completed | Error | TimedOut)
                | (TimedOut, Completed | Error | Processing)
                | (Error, Processing)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "processing" => Ok(StepStatus::Processing),
            "completed" => Ok(StepStatus::Completed),
            "error" => Ok(StepStatus::Error),
            "timed_out" | "timed-out" => Ok(StepStatus::TimedOut),
            _ => Err(FlowError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProjectStatus::Draft),
            "in_progress" | "in-progress" => Ok(ProjectStatus::InProgress),
            "completed" => Ok(ProjectStatus::Completed),
            _ => Err(FlowError::InvalidProjectStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// PollPhase
// ---------------------------------------------------------------------------

/// Lifecycle of one trigger-and-poll session for a (project, step) pair.
///
/// Transitions: `Idle → Triggered → Polling → Resolved | Expired`.
/// A rejected trigger returns the session to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    #[default]
    Idle,
    Triggered,
    Polling,
    Resolved,
    Expired,
}

impl PollPhase {
    /// True while a session owns the (project, step) pair.
    pub fn is_active(self) -> bool {
        matches!(self, PollPhase::Triggered | PollPhase::Polling)
    }

    pub fn can_transition_to(self, target: PollPhase) -> bool {
        use PollPhase::*;
        matches!(
            (self, target),
            (Idle | Resolved | Expired, Triggered)
                | (Triggered, Polling | Idle)
                | (Polling, Resolved | Expired | Idle)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PollPhase::Idle => "idle",
            PollPhase::Triggered => "triggered",
            PollPhase::Polling => "polling",
            PollPhase::Resolved => "resolved",
            PollPhase::Expired => "expired",
        }
    }
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
