use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("step {step} not found for project {project}")]
    StepNotFound { project: String, step: u8 },

    #[error("no active prompt for step {0}")]
    PromptNotFound(u8),

    #[error("invalid step number: {0} (expected 1, 2 or 3)")]
    InvalidStep(String),

    #[error("invalid step status: {0}")]
    InvalidStatus(String),

    #[error("invalid project status: {0}")]
    InvalidProjectStatus(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("step {step} is locked: step {prerequisite} must be completed first")]
    StepLocked { step: u8, prerequisite: u8 },

    #[error("step {step} cannot be started while it is {status}")]
    StepNotStartable { step: u8, status: String },

    #[error("step {step} is already running for project {project}")]
    StepAlreadyRunning { project: String, step: u8 },

    #[error("{0}")]
    Validation(String),

    #[error("missing user identity")]
    Unauthenticated,

    #[error("{0}")]
    WebhookNotConfigured(String),

    #[error("webhook rejected the request: {0}")]
    TriggerRejected(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("datastore error: {0}")]
    Datastore(String),

    #[error("model catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub(crate) fn datastore(e: impl std::fmt::Display) -> Self {
        Self::Datastore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
