//! PostgREST-compatible remote datastore.
//!
//! Tables live under `{base}/rest/v1/{table}`; every request carries the
//! access key as both `apikey` and bearer token. Prompt versioning goes
//! through the `create_new_prompt_version` database function so the
//! deactivate-and-insert pair runs in one server-side transaction.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Datastore, StepLookup};
use crate::account::Account;
use crate::error::{FlowError, Result};
use crate::project::Project;
use crate::prompt::{Prompt, PromptEdit, PromptSort};
use crate::step::{ProjectStep, StepWrite};
use crate::types::{StepNumber, StepStatus};

const ACCOUNTS: &str = "users";
const PROJECTS: &str = "projects";
const STEPS: &str = "project_steps";
const PROMPTS: &str = "prompts";

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[derive(Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base: String,
    access_key: String,
}

impl RestStore {
    pub fn new(client: reqwest::Client, base: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{path}", self.base))
            .header("apikey", &self.access_key)
            .bearer_auth(&self.access_key)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await.map_err(FlowError::datastore)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "datastore request failed");
            return Err(FlowError::Datastore(format!(
                "request failed with status {}: {body}",
                status.as_u16()
            )));
        }
        resp.json().await.map_err(FlowError::datastore)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        debug!(table, ?query, "select");
        self.send(self.request(Method::GET, table).query(query)).await
    }

    async fn insert<T: Serialize + DeserializeOwned>(&self, table: &str, row: &T) -> Result<T> {
        let mut rows: Vec<T> = self
            .send(
                self.request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(row),
            )
            .await?;
        rows.pop()
            .ok_or_else(|| FlowError::Datastore(format!("insert into {table} returned no rows")))
    }

    async fn upsert<T: Serialize + DeserializeOwned>(
        &self,
        table: &str,
        on_conflict: &str,
        row: &T,
    ) -> Result<T> {
        let mut rows: Vec<T> = self
            .send(
                self.request(Method::POST, table)
                    .query(&[("on_conflict", on_conflict)])
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(row),
            )
            .await?;
        rows.pop()
            .ok_or_else(|| FlowError::Datastore(format!("upsert into {table} returned no rows")))
    }
}

// ---------------------------------------------------------------------------
// Conditional step writes
// ---------------------------------------------------------------------------

impl RestStore {
    /// PATCH the row only while its stored status is still `seen`. `None`
    /// means another writer moved it first.
    async fn update_step_from(&self, row: &ProjectStep, seen: StepStatus) -> Result<Option<ProjectStep>> {
        let mut rows: Vec<ProjectStep> = self
            .send(
                self.request(Method::PATCH, STEPS)
                    .query(&[
                        ("project_id", eq(&row.project_id)),
                        ("step_number", eq(row.step_number)),
                        ("status", eq(seen)),
                    ])
                    .header("Prefer", "return=representation")
                    .json(row),
            )
            .await?;
        Ok(rows.pop())
    }

    /// Insert a first row for the step. `None` means one already exists.
    async fn insert_step_if_absent(&self, row: &ProjectStep) -> Result<Option<ProjectStep>> {
        let mut rows: Vec<ProjectStep> = self
            .send(
                self.request(Method::POST, STEPS)
                    .query(&[("on_conflict", "project_id,step_number")])
                    .header("Prefer", "resolution=ignore-duplicates,return=representation")
                    .json(row),
            )
            .await?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl StepLookup for RestStore {
    async fn completed_step(
        &self,
        project_id: &str,
        step: StepNumber,
    ) -> Result<Option<ProjectStep>> {
        let mut rows: Vec<ProjectStep> = self
            .select(
                STEPS,
                &[
                    ("select", "*".into()),
                    ("project_id", eq(project_id)),
                    ("step_number", eq(step)),
                    ("status", eq(StepStatus::Completed)),
                ],
            )
            .await?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl Datastore for RestStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let mut rows: Vec<Account> = self
            .select(ACCOUNTS, &[("select", "*".into()), ("id", eq(id))])
            .await?;
        Ok(rows.pop())
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        self.upsert(ACCOUNTS, "id", account).await.map(|_| ())
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        self.insert(PROJECTS, project).await.map(|_| ())
    }

    async fn get_project(&self, id: &str, owner: &str) -> Result<Project> {
        let mut rows: Vec<Project> = self
            .select(
                PROJECTS,
                &[("select", "*".into()), ("id", eq(id)), ("created_by", eq(owner))],
            )
            .await?;
        rows.pop()
            .ok_or_else(|| FlowError::ProjectNotFound(id.to_string()))
    }

    async fn list_projects(&self, owner: &str) -> Result<Vec<Project>> {
        self.select(
            PROJECTS,
            &[
                ("select", "*".into()),
                ("created_by", eq(owner)),
                ("order", "created_at.desc".into()),
            ],
        )
        .await
    }

    async fn save_project(&self, project: &Project, owner: &str) -> Result<()> {
        let rows: Vec<Project> = self
            .send(
                self.request(Method::PATCH, PROJECTS)
                    .query(&[("id", eq(&project.id)), ("created_by", eq(owner))])
                    .header("Prefer", "return=representation")
                    .json(project),
            )
            .await?;
        if rows.is_empty() {
            return Err(FlowError::ProjectNotFound(project.id.clone()));
        }
        Ok(())
    }

    async fn delete_project(&self, id: &str, owner: &str) -> Result<()> {
        // Ownership check first so another user's steps are never touched.
        self.get_project(id, owner).await?;
        let _: Vec<ProjectStep> = self
            .send(
                self.request(Method::DELETE, STEPS)
                    .query(&[("project_id", eq(id))])
                    .header("Prefer", "return=representation"),
            )
            .await?;
        let rows: Vec<Project> = self
            .send(
                self.request(Method::DELETE, PROJECTS)
                    .query(&[("id", eq(id)), ("created_by", eq(owner))])
                    .header("Prefer", "return=representation"),
            )
            .await?;
        if rows.is_empty() {
            return Err(FlowError::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_steps(&self, project_id: &str) -> Result<Vec<ProjectStep>> {
        self.select(
            STEPS,
            &[
                ("select", "*".into()),
                ("project_id", eq(project_id)),
                ("order", "step_number.asc".into()),
            ],
        )
        .await
    }

    async fn get_step(&self, project_id: &str, step: StepNumber) -> Result<Option<ProjectStep>> {
        let mut rows: Vec<ProjectStep> = self
            .select(
                STEPS,
                &[
                    ("select", "*".into()),
                    ("project_id", eq(project_id)),
                    ("step_number", eq(step)),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn write_step(
        &self,
        project_id: &str,
        step: StepNumber,
        write: StepWrite,
    ) -> Result<ProjectStep> {
        // A concurrent writer can land between the read and the write. The
        // update only matches the status that was read and the insert never
        // overwrites, so a lost race is retried once and then refused.
        for _ in 0..2 {
            match self.get_step(project_id, step).await? {
                Some(mut row) => {
                    let seen = row.status;
                    row.apply_write(write.clone())?;
                    if let Some(saved) = self.update_step_from(&row, seen).await? {
                        return Ok(saved);
                    }
                }
                None => {
                    let mut row = ProjectStep::new(project_id, step);
                    row.apply_write(write.clone())?;
                    if let Some(saved) = self.insert_step_if_absent(&row).await? {
                        return Ok(saved);
                    }
                }
            }
            debug!(project = %project_id, step = step.get(), "step row changed underneath write");
        }
        let current = self
            .get_step(project_id, step)
            .await?
            .map(|r| r.status)
            .unwrap_or_default();
        Err(FlowError::InvalidTransition {
            from: current.to_string(),
            to: write.status.to_string(),
        })
    }

    async fn active_prompts(&self, sort: PromptSort) -> Result<Vec<Prompt>> {
        let dir = if sort.descending { "desc" } else { "asc" };
        let mut prompts: Vec<Prompt> = self
            .select(
                PROMPTS,
                &[
                    ("select", "*".into()),
                    ("is_active", "eq.true".into()),
                    ("order", format!("{}.{dir}", sort.column())),
                ],
            )
            .await?;
        // Server order is not stable on ties; re-apply locally.
        sort.apply(&mut prompts);
        Ok(prompts)
    }

    async fn active_prompt(&self, step: StepNumber) -> Result<Prompt> {
        let mut rows: Vec<Prompt> = self
            .select(
                PROMPTS,
                &[
                    ("select", "*".into()),
                    ("step_number", eq(step)),
                    ("is_active", "eq.true".into()),
                ],
            )
            .await?;
        rows.pop().ok_or(FlowError::PromptNotFound(step.get()))
    }

    async fn prompt_history(&self, step: StepNumber) -> Result<Vec<Prompt>> {
        self.select(
            PROMPTS,
            &[
                ("select", "*".into()),
                ("step_number", eq(step)),
                ("order", "version.desc".into()),
            ],
        )
        .await
    }

    async fn create_prompt_version(&self, step: StepNumber, edit: &PromptEdit) -> Result<Prompt> {
        edit.validate()?;
        let active = self.active_prompt(step).await?;
        let body = json!({
            "p_step_number": step.get(),
            "p_user_prompt_text": edit.user_prompt_text.trim(),
            "p_system_prompt_text": edit
                .system_prompt_text
                .as_deref()
                .unwrap_or(&active.system_prompt_text),
            "p_model_provider": edit.model_provider.as_ref().or(active.model_provider.as_ref()),
            "p_model_name": edit.model_name.as_ref().or(active.model_name.as_ref()),
            "p_parameters": edit.parameters.as_ref().or(active.parameters.as_ref()),
        });
        let resp: Value = self
            .send(
                self.request(Method::POST, "rpc/create_new_prompt_version")
                    .json(&body),
            )
            .await?;
        let row = match resp {
            Value::Array(rows) => rows.into_iter().next(),
            obj @ Value::Object(_) => Some(obj),
            _ => None,
        }
        .ok_or_else(|| FlowError::Datastore("Failed to create new prompt version".into()))?;
        Ok(serde_json::from_value(row)?)
    }

    async fn seed_prompts(&self) -> Result<Vec<Prompt>> {
        let existing = self.active_prompts(PromptSort::default()).await?;
        let mut inserted = Vec::new();
        for step in StepNumber::all() {
            if existing.iter().any(|p| p.step_number == *step) {
                continue;
            }
            inserted.push(self.insert(PROMPTS, &Prompt::seed(*step)).await?);
        }
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn store(server: &mockito::Server) -> RestStore {
        RestStore::new(reqwest::Client::new(), server.url(), "anon-key")
    }

    fn step_row(status: &str) -> Value {
        json!({
            "id": "s1",
            "project_id": "p1",
            "step_number": 2,
            "step_name": "Research",
            "status": status,
            "raw_response": "{\"topics\":[]}",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:00Z"
        })
    }

    #[tokio::test]
    async fn completed_step_filters_by_status_and_sends_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/project_steps")
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer anon-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("project_id".into(), "eq.p1".into()),
                Matcher::UrlEncoded("step_number".into(), "eq.2".into()),
                Matcher::UrlEncoded("status".into(), "eq.completed".into()),
            ]))
            .with_status(200)
            .with_body(json!([step_row("completed")]).to_string())
            .create_async()
            .await;

        let row = store(&server)
            .completed_step("p1", StepNumber::Research)
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
        assert_eq!(row.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn completed_step_empty_result_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/project_steps")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        assert!(store(&server)
            .completed_step("p1", StepNumber::Research)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn write_step_updates_only_from_the_status_it_read() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/rest/v1/project_steps")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!([step_row("pending")]).to_string())
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/rest/v1/project_steps")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("project_id".into(), "eq.p1".into()),
                Matcher::UrlEncoded("step_number".into(), "eq.2".into()),
                Matcher::UrlEncoded("status".into(), "eq.pending".into()),
            ]))
            .match_body(Matcher::PartialJson(json!({"id": "s1", "status": "processing"})))
            .with_status(200)
            .with_body(json!([step_row("processing")]).to_string())
            .create_async()
            .await;

        let row = store(&server)
            .write_step("p1", StepNumber::Research, StepWrite::status(StepStatus::Processing))
            .await
            .unwrap();
        patch.assert_async().await;
        assert_eq!(row.status, StepStatus::Processing);
    }

    #[tokio::test]
    async fn write_step_refuses_when_row_moved_underneath() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/rest/v1/project_steps")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!([step_row("pending")]).to_string())
            .create_async()
            .await;
        // The automation service completed the step first: nothing matches.
        let patch = server
            .mock("PATCH", "/rest/v1/project_steps")
            .match_query(Matcher::UrlEncoded("status".into(), "eq.pending".into()))
            .with_status(200)
            .with_body("[]")
            .expect(2)
            .create_async()
            .await;
        let insert = server
            .mock("POST", "/rest/v1/project_steps")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = store(&server)
            .write_step("p1", StepNumber::Research, StepWrite::status(StepStatus::Processing))
            .await
            .unwrap_err();
        patch.assert_async().await;
        insert.assert_async().await;
        assert!(matches!(err, FlowError::InvalidTransition { ref to, .. } if to == "processing"));
    }

    #[tokio::test]
    async fn write_step_inserts_without_overwriting() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/rest/v1/project_steps")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let insert = server
            .mock("POST", "/rest/v1/project_steps")
            .match_query(Matcher::UrlEncoded(
                "on_conflict".into(),
                "project_id,step_number".into(),
            ))
            .match_header(
                "prefer",
                Matcher::Regex("resolution=ignore-duplicates".into()),
            )
            .with_status(201)
            .with_body(json!([step_row("processing")]).to_string())
            .create_async()
            .await;

        let row = store(&server)
            .write_step("p1", StepNumber::Research, StepWrite::status(StepStatus::Processing))
            .await
            .unwrap();
        insert.assert_async().await;
        assert_eq!(row.step_number, StepNumber::Research);
    }

    #[tokio::test]
    async fn http_failure_becomes_datastore_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/project_steps")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let err = store(&server)
            .completed_step("p1", StepNumber::Research)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Datastore(ref m) if m.contains("500")), "{err}");
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/projects")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "eq.p9".into()),
                Matcher::UrlEncoded("created_by".into(), "eq.u1".into()),
            ]))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let err = store(&server).get_project("p9", "u1").await.unwrap_err();
        assert!(matches!(err, FlowError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn create_prompt_version_calls_rpc_with_carried_settings() {
        let mut server = mockito::Server::new_async().await;
        let active = Prompt::seed(StepNumber::Research);
        let _active = server
            .mock("GET", "/rest/v1/prompts")
            .match_query(Matcher::UrlEncoded("is_active".into(), "eq.true".into()))
            .with_status(200)
            .with_body(json!([active]).to_string())
            .create_async()
            .await;

        let mut next = active.clone();
        next.id = "v2".into();
        next.version = 2;
        next.user_prompt_text = "new text".into();
        let rpc = server
            .mock("POST", "/rest/v1/rpc/create_new_prompt_version")
            .match_body(Matcher::PartialJson(json!({
                "p_step_number": 2,
                "p_user_prompt_text": "new text",
                "p_model_name": active.model_name,
            })))
            .with_status(200)
            .with_body(json!([next]).to_string())
            .create_async()
            .await;

        let created = store(&server)
            .create_prompt_version(StepNumber::Research, &PromptEdit::user_text("new text"))
            .await
            .unwrap();
        rpc.assert_async().await;
        assert_eq!(created.version, 2);
    }

    #[tokio::test]
    async fn empty_rpc_response_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _active = server
            .mock("GET", "/rest/v1/prompts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!([Prompt::seed(StepNumber::Research)]).to_string())
            .create_async()
            .await;
        let _rpc = server
            .mock("POST", "/rest/v1/rpc/create_new_prompt_version")
            .with_status(200)
            .with_body("null")
            .create_async()
            .await;
        let err = store(&server)
            .create_prompt_version(StepNumber::Research, &PromptEdit::user_text("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create new prompt version"));
    }

    #[tokio::test]
    async fn invalid_edit_never_reaches_the_server() {
        let mut server = mockito::Server::new_async().await;
        let rpc = server
            .mock("POST", "/rest/v1/rpc/create_new_prompt_version")
            .expect(0)
            .create_async()
            .await;
        let err = store(&server)
            .create_prompt_version(StepNumber::Research, &PromptEdit::user_text(""))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
        rpc.assert_async().await;
    }
}
