#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn scriptflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("scriptflow").unwrap();
    cmd.current_dir(dir.path())
        .env("SCRIPTFLOW_DATA_PATH", dir.path().join("data.redb"))
        .env("SCRIPTFLOW_USER", "u1")
        .env_remove("SCRIPTFLOW_CONFIG")
        .env_remove("DATASTORE_URL")
        .env_remove("TRANSCRIPT_ANALYSIS_WEBHOOK_URL")
        .env_remove("RESEARCH_WEBHOOK_URL")
        .env_remove("OUTLINE_GENERATION_WEBHOOK_URL");
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let out = cmd.arg("--json").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

fn create_project(dir: &TempDir) -> String {
    let project = json_output(scriptflow(dir).args([
        "project",
        "create",
        "--title",
        "Launch video",
        "--url",
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "--client",
        "Acme",
    ]));
    project["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// scriptflow project
// ---------------------------------------------------------------------------

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    scriptflow(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("project"))
        .stdout(predicate::str::contains("prompt"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn project_commands_need_a_user() {
    let dir = TempDir::new().unwrap();
    scriptflow(&dir)
        .env_remove("SCRIPTFLOW_USER")
        .args(["project", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--user"));
}

#[test]
fn create_then_list() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);

    let projects = json_output(scriptflow(&dir).args(["project", "list"]));
    let projects = projects.as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["id"], id.as_str());
    assert_eq!(projects[0]["status"], "draft");

    scriptflow(&dir)
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Launch video"));
}

#[test]
fn projects_are_scoped_to_their_owner() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);

    let projects = json_output(scriptflow(&dir).args(["--user", "u2", "project", "list"]));
    assert!(projects.as_array().unwrap().is_empty());

    scriptflow(&dir)
        .args(["--user", "u2", "project", "show", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("project not found"));
}

#[test]
fn non_youtube_url_is_rejected() {
    let dir = TempDir::new().unwrap();
    scriptflow(&dir)
        .args([
            "project",
            "create",
            "--title",
            "x",
            "--url",
            "https://vimeo.com/123",
        ])
        .assert()
        .failure();
}

#[test]
fn show_reports_locked_steps() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);
    scriptflow(&dir)
        .args(["project", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Transcript Analysis"))
        .stdout(predicate::str::contains("available"))
        .stdout(predicate::str::contains("locked"));
}

#[test]
fn update_and_delete() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);

    let updated = json_output(scriptflow(&dir).args(["project", "update", &id, "--title", "Renamed"]));
    assert_eq!(updated["title"], "Renamed");
    assert_eq!(updated["client_info"], "Acme");

    scriptflow(&dir)
        .args(["project", "delete", &id])
        .assert()
        .success();
    scriptflow(&dir)
        .args(["project", "show", &id])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// scriptflow step
// ---------------------------------------------------------------------------

#[test]
fn recording_completion_unlocks_next_step() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);

    scriptflow(&dir)
        .args(["step", "record", &id, "1", "--status", "completed", "--response", "{}"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    let view = json_output(scriptflow(&dir).args(["step", "status", &id]));
    assert_eq!(view[0]["affordance"], "completed");
    assert_eq!(view[1]["affordance"], "available");
    assert_eq!(view[1]["active"], true);
    assert_eq!(view[2]["affordance"], "locked");

    let project = json_output(scriptflow(&dir).args(["project", "show", &id]));
    assert_eq!(project["project"]["status"], "in_progress");
    assert_eq!(project["project"]["current_step"], 2);
}

#[test]
fn status_regression_is_refused() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);
    scriptflow(&dir)
        .args(["step", "record", &id, "1", "--status", "completed"])
        .assert()
        .success();
    scriptflow(&dir)
        .args(["step", "record", &id, "1", "--status", "pending"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));
}

#[test]
fn invalid_step_number_is_rejected() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);
    scriptflow(&dir)
        .args(["step", "record", &id, "4", "--status", "completed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid step number"));
}

#[test]
fn run_without_webhook_fails_fast() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);
    scriptflow(&dir)
        .args(["step", "run", &id, "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Webhook URL not configured"));
}

#[test]
fn locked_step_does_not_run() {
    let dir = TempDir::new().unwrap();
    let id = create_project(&dir);
    scriptflow(&dir)
        .env("RESEARCH_WEBHOOK_URL", "http://127.0.0.1:9/research")
        .args(["step", "run", &id, "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("locked"));
}

// ---------------------------------------------------------------------------
// scriptflow prompt
// ---------------------------------------------------------------------------

#[test]
fn seeding_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let seeded = json_output(scriptflow(&dir).args(["prompt", "seed"]));
    assert_eq!(seeded.as_array().unwrap().len(), 3);

    scriptflow(&dir)
        .args(["prompt", "seed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already"));
}

#[test]
fn editing_a_prompt_adds_a_version() {
    let dir = TempDir::new().unwrap();
    scriptflow(&dir).args(["prompt", "seed"]).assert().success();

    let prompt = json_output(scriptflow(&dir).args([
        "prompt",
        "edit",
        "3",
        "--text",
        "  Write the outline as markdown.  ",
        "--model",
        "openai/gpt-4o",
    ]));
    assert_eq!(prompt["version"], 2);
    assert_eq!(prompt["user_prompt_text"], "Write the outline as markdown.");
    assert_eq!(prompt["model_provider"], "openai");

    let history = json_output(scriptflow(&dir).args(["prompt", "history", "3"]));
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["is_active"], true);
    assert_eq!(history[1]["is_active"], false);

    let active = json_output(scriptflow(&dir).args(["prompt", "show", "3"]));
    assert_eq!(active["version"], 2);
}

#[test]
fn empty_prompt_is_rejected() {
    let dir = TempDir::new().unwrap();
    scriptflow(&dir).args(["prompt", "seed"]).assert().success();
    scriptflow(&dir)
        .args(["prompt", "edit", "1", "--text", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Prompt text cannot be empty"));
}

#[test]
fn prompts_list_sorted_descending() {
    let dir = TempDir::new().unwrap();
    scriptflow(&dir).args(["prompt", "seed"]).assert().success();
    let prompts = json_output(scriptflow(&dir).args(["prompt", "list", "--desc"]));
    let steps: Vec<u64> = prompts
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["step_number"].as_u64().unwrap())
        .collect();
    assert_eq!(steps, vec![3, 2, 1]);

    scriptflow(&dir)
        .args(["prompt", "list", "--sort", "colour"])
        .assert()
        .failure();
}
