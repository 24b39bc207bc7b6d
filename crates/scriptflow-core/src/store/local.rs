//! Embedded datastore backed by redb.
//!
//! # Table design
//!
//! Every table maps a string key to a JSON-encoded row:
//! ```text
//! accounts  user id                   -> Account
//! projects  project id                -> Project
//! steps     "{project_id}/{step}"     -> ProjectStep
//! prompts   prompt id                 -> Prompt
//! ```
//!
//! Step keys make `(project, step)` unique by construction. Prompt versioning
//! runs inside a single write transaction, so readers always see exactly one
//! active row per step.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Datastore, StepLookup};
use crate::account::Account;
use crate::error::{FlowError, Result};
use crate::project::Project;
use crate::prompt::{self, Prompt, PromptEdit, PromptSort};
use crate::step::{ProjectStep, StepWrite};
use crate::types::{StepNumber, StepStatus};

const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");
const STEPS: TableDefinition<&str, &[u8]> = TableDefinition::new("project_steps");
const PROMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("prompts");

fn step_key(project_id: &str, step: StepNumber) -> String {
    format!("{project_id}/{step}")
}

fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(row).map_err(FlowError::datastore)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(FlowError::datastore)
}

// ---------------------------------------------------------------------------
// Synchronous table helpers
// ---------------------------------------------------------------------------

fn get_row<T: DeserializeOwned>(
    db: &Database,
    def: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<T>> {
    let rt = db.begin_read().map_err(FlowError::datastore)?;
    let table = rt.open_table(def).map_err(FlowError::datastore)?;
    let row = table.get(key).map_err(FlowError::datastore)?;
    row.map(|v| decode(v.value())).transpose()
}

fn all_rows<T: DeserializeOwned>(db: &Database, def: TableDefinition<&str, &[u8]>) -> Result<Vec<T>> {
    let rt = db.begin_read().map_err(FlowError::datastore)?;
    let table = rt.open_table(def).map_err(FlowError::datastore)?;
    let mut rows = Vec::new();
    for entry in table.iter().map_err(FlowError::datastore)? {
        let (_, v) = entry.map_err(FlowError::datastore)?;
        rows.push(decode(v.value())?);
    }
    Ok(rows)
}

fn put_row<T: Serialize>(
    db: &Database,
    def: TableDefinition<&str, &[u8]>,
    key: &str,
    row: &T,
) -> Result<()> {
    let value = encode(row)?;
    let wt = db.begin_write().map_err(FlowError::datastore)?;
    {
        let mut table = wt.open_table(def).map_err(FlowError::datastore)?;
        table
            .insert(key, value.as_slice())
            .map_err(FlowError::datastore)?;
    }
    wt.commit().map_err(FlowError::datastore)
}

fn owned_project(db: &Database, id: &str, owner: &str) -> Result<Project> {
    match get_row::<Project>(db, PROJECTS, id)? {
        Some(p) if p.is_owned_by(owner) => Ok(p),
        _ => Err(FlowError::ProjectNotFound(id.to_string())),
    }
}

fn project_steps(db: &Database, project_id: &str) -> Result<Vec<ProjectStep>> {
    let mut steps: Vec<ProjectStep> = all_rows::<ProjectStep>(db, STEPS)?
        .into_iter()
        .filter(|s| s.project_id == project_id)
        .collect();
    steps.sort_by_key(|s| s.step_number);
    Ok(steps)
}

fn active_for(db: &Database, step: StepNumber) -> Result<Prompt> {
    all_rows::<Prompt>(db, PROMPTS)?
        .into_iter()
        .filter(|p| p.step_number == step && p.is_active)
        .max_by_key(|p| p.version)
        .ok_or(FlowError::PromptNotFound(step.get()))
}

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
}

impl LocalStore {
    /// Open or create the database at `path`, creating missing tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(FlowError::datastore)?;
        let wt = db.begin_write().map_err(FlowError::datastore)?;
        for def in [ACCOUNTS, PROJECTS, STEPS, PROMPTS] {
            wt.open_table(def).map_err(FlowError::datastore)?;
        }
        wt.commit().map_err(FlowError::datastore)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run a synchronous database operation off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| FlowError::Datastore(format!("task join error: {e}")))?
    }
}

#[async_trait]
impl StepLookup for LocalStore {
    async fn completed_step(
        &self,
        project_id: &str,
        step: StepNumber,
    ) -> Result<Option<ProjectStep>> {
        let row = self.get_step(project_id, step).await?;
        Ok(row.filter(|s| s.status == StepStatus::Completed))
    }
}

#[async_trait]
impl Datastore for LocalStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let id = id.to_string();
        self.blocking(move |db| get_row(db, ACCOUNTS, &id)).await
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let account = account.clone();
        self.blocking(move |db| put_row(db, ACCOUNTS, &account.id, &account))
            .await
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        let project = project.clone();
        self.blocking(move |db| put_row(db, PROJECTS, &project.id, &project))
            .await
    }

    async fn get_project(&self, id: &str, owner: &str) -> Result<Project> {
        let (id, owner) = (id.to_string(), owner.to_string());
        self.blocking(move |db| owned_project(db, &id, &owner)).await
    }

    async fn list_projects(&self, owner: &str) -> Result<Vec<Project>> {
        let owner = owner.to_string();
        self.blocking(move |db| {
            let mut projects: Vec<Project> = all_rows::<Project>(db, PROJECTS)?
                .into_iter()
                .filter(|p| p.is_owned_by(&owner))
                .collect();
            projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(projects)
        })
        .await
    }

    async fn save_project(&self, project: &Project, owner: &str) -> Result<()> {
        let (project, owner) = (project.clone(), owner.to_string());
        self.blocking(move |db| {
            owned_project(db, &project.id, &owner)?;
            put_row(db, PROJECTS, &project.id, &project)
        })
        .await
    }

    async fn delete_project(&self, id: &str, owner: &str) -> Result<()> {
        let (id, owner) = (id.to_string(), owner.to_string());
        self.blocking(move |db| {
            owned_project(db, &id, &owner)?;
            let wt = db.begin_write().map_err(FlowError::datastore)?;
            {
                let mut projects = wt.open_table(PROJECTS).map_err(FlowError::datastore)?;
                projects.remove(id.as_str()).map_err(FlowError::datastore)?;
                let mut steps = wt.open_table(STEPS).map_err(FlowError::datastore)?;
                for step in StepNumber::all() {
                    steps
                        .remove(step_key(&id, *step).as_str())
                        .map_err(FlowError::datastore)?;
                }
            }
            wt.commit().map_err(FlowError::datastore)
        })
        .await
    }

    async fn list_steps(&self, project_id: &str) -> Result<Vec<ProjectStep>> {
        let project_id = project_id.to_string();
        self.blocking(move |db| project_steps(db, &project_id)).await
    }

    async fn get_step(&self, project_id: &str, step: StepNumber) -> Result<Option<ProjectStep>> {
        let key = step_key(project_id, step);
        self.blocking(move |db| get_row(db, STEPS, &key)).await
    }

    async fn write_step(
        &self,
        project_id: &str,
        step: StepNumber,
        write: StepWrite,
    ) -> Result<ProjectStep> {
        let project_id = project_id.to_string();
        self.blocking(move |db| {
            let key = step_key(&project_id, step);
            let wt = db.begin_write().map_err(FlowError::datastore)?;
            let row = {
                let mut table = wt.open_table(STEPS).map_err(FlowError::datastore)?;
                let existing: Option<ProjectStep> = table
                    .get(key.as_str())
                    .map_err(FlowError::datastore)?
                    .map(|v| decode(v.value()))
                    .transpose()?;
                let mut row = existing.unwrap_or_else(|| ProjectStep::new(&project_id, step));
                row.apply_write(write)?;
                let value = encode(&row)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(FlowError::datastore)?;
                row
            };
            wt.commit().map_err(FlowError::datastore)?;
            Ok(row)
        })
        .await
    }

    async fn active_prompts(&self, sort: PromptSort) -> Result<Vec<Prompt>> {
        self.blocking(move |db| {
            let mut prompts: Vec<Prompt> = all_rows::<Prompt>(db, PROMPTS)?
                .into_iter()
                .filter(|p| p.is_active)
                .collect();
            sort.apply(&mut prompts);
            Ok(prompts)
        })
        .await
    }

    async fn active_prompt(&self, step: StepNumber) -> Result<Prompt> {
        self.blocking(move |db| active_for(db, step)).await
    }

    async fn prompt_history(&self, step: StepNumber) -> Result<Vec<Prompt>> {
        self.blocking(move |db| {
            let mut rows: Vec<Prompt> = all_rows::<Prompt>(db, PROMPTS)?
                .into_iter()
                .filter(|p| p.step_number == step)
                .collect();
            rows.sort_by(|a, b| b.version.cmp(&a.version));
            Ok(rows)
        })
        .await
    }

    async fn create_prompt_version(&self, step: StepNumber, edit: &PromptEdit) -> Result<Prompt> {
        edit.validate()?;
        let edit = edit.clone();
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(FlowError::datastore)?;
            let next = {
                let mut table = wt.open_table(PROMPTS).map_err(FlowError::datastore)?;
                let mut rows: Vec<Prompt> = Vec::new();
                for entry in table.iter().map_err(FlowError::datastore)? {
                    let (_, v) = entry.map_err(FlowError::datastore)?;
                    let row: Prompt = decode(v.value())?;
                    if row.step_number == step {
                        rows.push(row);
                    }
                }
                let next = prompt::apply_new_version(&mut rows, step, &edit)?;
                for row in &rows {
                    let value = encode(row)?;
                    table
                        .insert(row.id.as_str(), value.as_slice())
                        .map_err(FlowError::datastore)?;
                }
                next
            };
            wt.commit().map_err(FlowError::datastore)?;
            Ok(next)
        })
        .await
    }

    async fn seed_prompts(&self) -> Result<Vec<Prompt>> {
        self.blocking(|db| {
            let existing: Vec<Prompt> = all_rows(db, PROMPTS)?;
            let mut inserted = Vec::new();
            for step in StepNumber::all() {
                if existing.iter().any(|p| p.step_number == *step && p.is_active) {
                    continue;
                }
                let seed = Prompt::seed(*step);
                put_row(db, PROMPTS, &seed.id, &seed)?;
                inserted.push(seed);
            }
            Ok(inserted)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::NewProject;
    use crate::prompt::PromptSortField;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(&dir.path().join("data.redb")).unwrap();
        (dir, store)
    }

    fn project(owner: &str) -> Project {
        Project::new(
            NewProject {
                title: "Episode 12".into(),
                youtube_url: "https://youtu.be/abc".into(),
                context: "demo".into(),
                client_info: Some("Acme".into()),
            },
            owner,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn projects_are_scoped_to_their_owner() {
        let (_dir, store) = open_tmp();
        let p = project("u1");
        store.insert_project(&p).await.unwrap();

        assert_eq!(store.get_project(&p.id, "u1").await.unwrap(), p);
        assert!(matches!(
            store.get_project(&p.id, "u2").await,
            Err(FlowError::ProjectNotFound(_))
        ));
        assert_eq!(store.list_projects("u1").await.unwrap().len(), 1);
        assert!(store.list_projects("u2").await.unwrap().is_empty());
        assert!(store.save_project(&p, "u2").await.is_err());
        assert!(store.delete_project(&p.id, "u2").await.is_err());
    }

    #[tokio::test]
    async fn delete_project_cascades_to_steps() {
        let (_dir, store) = open_tmp();
        let p = project("u1");
        store.insert_project(&p).await.unwrap();
        store
            .write_step(&p.id, StepNumber::TranscriptAnalysis, StepWrite::status(StepStatus::Processing))
            .await
            .unwrap();

        store.delete_project(&p.id, "u1").await.unwrap();
        assert!(store.list_steps(&p.id).await.unwrap().is_empty());
        assert!(store.get_project(&p.id, "u1").await.is_err());
    }

    #[tokio::test]
    async fn write_step_upserts_one_row_per_step() {
        let (_dir, store) = open_tmp();
        let pid = "p1";
        store
            .write_step(pid, StepNumber::Research, StepWrite::status(StepStatus::Processing))
            .await
            .unwrap();
        store
            .write_step(pid, StepNumber::TranscriptAnalysis, StepWrite::status(StepStatus::Completed))
            .await
            .unwrap();
        let done = store
            .write_step(
                pid,
                StepNumber::Research,
                StepWrite {
                    status: StepStatus::Completed,
                    raw_response: Some("{}".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, StepStatus::Completed);

        let steps = store.list_steps(pid).await.unwrap();
        let numbers: Vec<u8> = steps.iter().map(|s| s.step_number.get()).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn write_step_rejects_regression() {
        let (_dir, store) = open_tmp();
        store
            .write_step("p1", StepNumber::TranscriptAnalysis, StepWrite::status(StepStatus::Completed))
            .await
            .unwrap();
        let err = store
            .write_step("p1", StepNumber::TranscriptAnalysis, StepWrite::status(StepStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { .. }));
        let row = store
            .get_step("p1", StepNumber::TranscriptAnalysis)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn completed_step_ignores_other_statuses() {
        let (_dir, store) = open_tmp();
        store
            .write_step("p1", StepNumber::Research, StepWrite::status(StepStatus::Processing))
            .await
            .unwrap();
        assert!(store
            .completed_step("p1", StepNumber::Research)
            .await
            .unwrap()
            .is_none());
        store
            .write_step("p1", StepNumber::Research, StepWrite::status(StepStatus::Completed))
            .await
            .unwrap();
        assert!(store
            .completed_step("p1", StepNumber::Research)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.seed_prompts().await.unwrap().len(), 3);
        assert!(store.seed_prompts().await.unwrap().is_empty());
        assert_eq!(
            store.active_prompts(PromptSort::default()).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn prompt_version_three_becomes_four() {
        let (_dir, store) = open_tmp();
        store.seed_prompts().await.unwrap();
        for text in ["v2 text", "v3 text"] {
            store
                .create_prompt_version(StepNumber::Research, &PromptEdit::user_text(text))
                .await
                .unwrap();
        }
        let v3 = store.active_prompt(StepNumber::Research).await.unwrap();
        assert_eq!(v3.version, 3);

        let v4 = store
            .create_prompt_version(StepNumber::Research, &PromptEdit::user_text("new text"))
            .await
            .unwrap();
        assert_eq!(v4.version, 4);

        let history = store.prompt_history(StepNumber::Research).await.unwrap();
        let versions: Vec<(u32, bool)> = history.iter().map(|p| (p.version, p.is_active)).collect();
        assert_eq!(versions, vec![(4, true), (3, false), (2, false), (1, false)]);

        let active = store.active_prompts(PromptSort::default()).await.unwrap();
        assert_eq!(active.len(), 3);
        assert_eq!(active[1].version, 4);
    }

    #[tokio::test]
    async fn invalid_prompt_edit_writes_nothing() {
        let (_dir, store) = open_tmp();
        store.seed_prompts().await.unwrap();
        assert!(store
            .create_prompt_version(StepNumber::Research, &PromptEdit::user_text("  "))
            .await
            .is_err());
        let history = store.prompt_history(StepNumber::Research).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_active);
    }

    #[tokio::test]
    async fn active_prompts_respect_sort() {
        let (_dir, store) = open_tmp();
        store.seed_prompts().await.unwrap();
        let prompts = store
            .active_prompts(PromptSort {
                field: PromptSortField::StepNumber,
                descending: true,
            })
            .await
            .unwrap();
        let steps: Vec<u8> = prompts.iter().map(|p| p.step_number.get()).collect();
        assert_eq!(steps, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn accounts_upsert_by_id() {
        let (_dir, store) = open_tmp();
        assert!(store.get_account("u1").await.unwrap().is_none());
        let acct = Account::sign_in(
            None,
            "u1",
            crate::account::AccountProfile {
                email: "ada@example.com".into(),
                name: None,
            },
        )
        .unwrap();
        store.upsert_account(&acct).await.unwrap();
        assert_eq!(store.get_account("u1").await.unwrap(), Some(acct));
    }
}
