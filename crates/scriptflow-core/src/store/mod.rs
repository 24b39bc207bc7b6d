//! Datastore abstraction.
//!
//! All persistence goes through [`Datastore`]. Two backends exist: an embedded
//! redb database ([`LocalStore`]) and a PostgREST client for a managed
//! database ([`RestStore`]). The poller only needs the narrow [`StepLookup`]
//! read.

mod local;
mod rest;

pub use local::LocalStore;
pub use rest::RestStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::account::Account;
use crate::config::DatastoreConfig;
use crate::error::Result;
use crate::project::Project;
use crate::prompt::{Prompt, PromptEdit, PromptSort};
use crate::step::{ProjectStep, StepWrite};
use crate::types::StepNumber;

/// The single read the polling loop issues each tick.
#[async_trait]
pub trait StepLookup: Send + Sync {
    /// The record for `(project_id, step)` if its status is `completed`.
    async fn completed_step(&self, project_id: &str, step: StepNumber)
        -> Result<Option<ProjectStep>>;
}

#[async_trait]
pub trait Datastore: StepLookup {
    // -- accounts ----------------------------------------------------------

    async fn get_account(&self, id: &str) -> Result<Option<Account>>;
    async fn upsert_account(&self, account: &Account) -> Result<()>;

    // -- projects ----------------------------------------------------------

    async fn insert_project(&self, project: &Project) -> Result<()>;
    /// Fails with `ProjectNotFound` unless the project exists and belongs to `owner`.
    async fn get_project(&self, id: &str, owner: &str) -> Result<Project>;
    /// The owner's projects, newest first.
    async fn list_projects(&self, owner: &str) -> Result<Vec<Project>>;
    async fn save_project(&self, project: &Project, owner: &str) -> Result<()>;
    /// Removes the project and its step records.
    async fn delete_project(&self, id: &str, owner: &str) -> Result<()>;

    // -- steps -------------------------------------------------------------

    /// All step records of a project, ordered by step number.
    async fn list_steps(&self, project_id: &str) -> Result<Vec<ProjectStep>>;
    async fn get_step(&self, project_id: &str, step: StepNumber) -> Result<Option<ProjectStep>>;
    /// Create or update the step record, enforcing forward-only status moves.
    async fn write_step(
        &self,
        project_id: &str,
        step: StepNumber,
        write: StepWrite,
    ) -> Result<ProjectStep>;

    // -- prompts -----------------------------------------------------------

    async fn active_prompts(&self, sort: PromptSort) -> Result<Vec<Prompt>>;
    async fn active_prompt(&self, step: StepNumber) -> Result<Prompt>;
    /// Every version for the step, newest first.
    async fn prompt_history(&self, step: StepNumber) -> Result<Vec<Prompt>>;
    /// Deactivate the current version and insert its successor atomically.
    async fn create_prompt_version(&self, step: StepNumber, edit: &PromptEdit) -> Result<Prompt>;
    /// Insert version 1 for every step that has no active prompt. Returns the
    /// inserted rows.
    async fn seed_prompts(&self) -> Result<Vec<Prompt>>;
}

/// Open the datastore selected by configuration: the remote REST backend when
/// a URL is configured, otherwise the embedded database.
pub fn open(config: &DatastoreConfig, client: reqwest::Client) -> Result<Arc<dyn Datastore>> {
    match &config.url {
        Some(url) => {
            info!(url = %url, "using remote datastore");
            Ok(Arc::new(RestStore::new(
                client,
                url.clone(),
                config.access_key.clone().unwrap_or_default(),
            )))
        }
        None => {
            info!(path = %config.path.display(), "using local datastore");
            Ok(Arc::new(LocalStore::open(&config.path)?))
        }
    }
}
