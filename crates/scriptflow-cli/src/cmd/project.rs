use crate::output::{or_dash, print_json, print_table, truncate};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use clap::Subcommand;
use scriptflow_core::gate;
use scriptflow_core::project::{NewProject, Project, ProjectUpdate};
use scriptflow_core::tracker::StepTracker;

#[derive(Subcommand)]
pub enum ProjectSubcommand {
    /// Create a project from a YouTube video
    Create {
        #[arg(long)]
        title: String,
        /// YouTube video URL
        #[arg(long)]
        url: String,
        /// Free-form context passed to every step
        #[arg(long, default_value = "")]
        context: String,
        /// Client label
        #[arg(long)]
        client: Option<String>,
    },
    /// List your projects, newest first
    List,
    /// Show a project with its step progress
    Show { id: String },
    /// Edit project fields
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        context: Option<String>,
        /// Client label (empty string clears it)
        #[arg(long)]
        client: Option<String>,
    },
    /// Delete a project and its step records
    Delete { id: String },
}

pub fn run(ws: &Workspace, subcmd: ProjectSubcommand, json: bool) -> Result<()> {
    match subcmd {
        ProjectSubcommand::Create {
            title,
            url,
            context,
            client,
        } => create(
            ws,
            NewProject {
                title,
                youtube_url: url,
                context,
                client_info: client,
            },
            json,
        ),
        ProjectSubcommand::List => list(ws, json),
        ProjectSubcommand::Show { id } => show(ws, &id, json),
        ProjectSubcommand::Update {
            id,
            title,
            url,
            context,
            client,
        } => update(
            ws,
            &id,
            ProjectUpdate {
                title,
                youtube_url: url,
                context,
                client_info: client,
            },
            json,
        ),
        ProjectSubcommand::Delete { id } => delete(ws, &id, json),
    }
}

// ---------------------------------------------------------------------------
// create / list
// ---------------------------------------------------------------------------

fn create(ws: &Workspace, input: NewProject, json: bool) -> Result<()> {
    let user = ws.user()?;
    let project = Project::new(input, user)?;
    ws.block_on(|store, _| async move {
        store
            .insert_project(&project)
            .await
            .context("failed to create project")?;
        if json {
            print_json(&project)?;
        } else {
            println!("Created project '{}' ({})", project.title, project.id);
        }
        Ok(())
    })
}

fn list(ws: &Workspace, json: bool) -> Result<()> {
    let user = ws.user()?.to_string();
    let projects = ws.block_on(|store, _| async move {
        store
            .list_projects(&user)
            .await
            .context("failed to list projects")
    })?;

    if json {
        return print_json(&projects);
    }
    if projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    let rows = projects
        .iter()
        .map(|p| {
            vec![
                p.id.clone(),
                truncate(&p.title, 32),
                p.status.to_string(),
                p.current_step.get().to_string(),
                p.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "TITLE", "STATUS", "STEP", "CREATED"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(ws: &Workspace, id: &str, json: bool) -> Result<()> {
    let user = ws.user()?.to_string();
    let id = id.to_string();
    let (project, tracker) = ws.block_on(|store, _| async move {
        let project = store.get_project(&id, &user).await?;
        let tracker = StepTracker::from_steps(store.list_steps(&id).await?);
        Ok((project, tracker))
    })?;
    let view = gate::view(&tracker);

    if json {
        return print_json(&serde_json::json!({
            "project": project,
            "steps": tracker,
            "gate": view,
        }));
    }

    println!("{} ({})", project.title, project.id);
    println!("  url:     {}", project.youtube_url);
    println!("  client:  {}", or_dash(project.client_info.as_deref()));
    println!("  status:  {}", project.status);
    if !project.context.is_empty() {
        println!("  context: {}", truncate(&project.context, 60));
    }
    println!();
    let rows = view
        .iter()
        .map(|v| {
            let row = tracker.get(v.step_number);
            vec![
                v.step_number.get().to_string(),
                v.name.to_string(),
                v.affordance.to_string(),
                or_dash(row.and_then(|r| r.model_used.clone())),
                or_dash(row.and_then(|r| r.processing_cost)),
                if v.active { "*".into() } else { String::new() },
            ]
        })
        .collect();
    print_table(&["#", "STEP", "STATE", "MODEL", "COST", ""], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// update / delete
// ---------------------------------------------------------------------------

fn update(ws: &Workspace, id: &str, update: ProjectUpdate, json: bool) -> Result<()> {
    let user = ws.user()?.to_string();
    let id = id.to_string();
    let project = ws.block_on(|store, _| async move {
        let mut project = store.get_project(&id, &user).await?;
        project.apply(update)?;
        store
            .save_project(&project, &user)
            .await
            .context("failed to save project")?;
        Ok(project)
    })?;

    if json {
        print_json(&project)
    } else {
        println!("Updated project '{}'", project.title);
        Ok(())
    }
}

fn delete(ws: &Workspace, id: &str, json: bool) -> Result<()> {
    let user = ws.user()?.to_string();
    let owned = id.to_string();
    ws.block_on(|store, _| async move {
        store
            .delete_project(&owned, &user)
            .await
            .context("failed to delete project")
    })?;

    if json {
        print_json(&serde_json::json!({ "deleted": id }))
    } else {
        println!("Deleted project {id}");
        Ok(())
    }
}
