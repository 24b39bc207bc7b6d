use crate::output::{or_dash, print_json, print_table, truncate};
use crate::workspace::Workspace;
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use scriptflow_core::prompt::{PromptEdit, PromptSort, PromptSortField};
use scriptflow_core::types::StepNumber;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum PromptSubcommand {
    /// List the active prompt of every step
    List {
        /// step_number, name, version or updated_at
        #[arg(long, default_value = "step_number")]
        sort: PromptSortField,
        /// Sort descending
        #[arg(long)]
        desc: bool,
    },
    /// Show the active prompt for a step
    Show { step: StepNumber },
    /// Save a new version of a step's prompt
    Edit {
        step: StepNumber,
        /// New user prompt text
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        /// Read the user prompt text from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Replace the system prompt
        #[arg(long)]
        system: Option<String>,
        /// Model id, e.g. anthropic/claude-3-opus-20240229
        #[arg(long)]
        model: Option<String>,
    },
    /// Show every version of a step's prompt, newest first
    History { step: StepNumber },
    /// Insert default prompts for steps that have none
    Seed,
}

pub fn run(ws: &Workspace, subcmd: PromptSubcommand, json: bool) -> Result<()> {
    match subcmd {
        PromptSubcommand::List { sort, desc } => list(
            ws,
            PromptSort {
                field: sort,
                descending: desc,
            },
            json,
        ),
        PromptSubcommand::Show { step } => show(ws, step, json),
        PromptSubcommand::Edit {
            step,
            text,
            file,
            system,
            model,
        } => {
            let text = match (text, file) {
                (Some(t), _) => t,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => bail!("provide the new prompt with --text or --file"),
            };
            let (model_provider, model_name) = match model {
                Some(id) => (
                    Some(scriptflow_core::models::provider_of(&id).to_string()),
                    Some(id),
                ),
                None => (None, None),
            };
            let edit = PromptEdit {
                user_prompt_text: text,
                system_prompt_text: system,
                model_provider,
                model_name,
                parameters: None,
            };
            edit_prompt(ws, step, edit, json)
        }
        PromptSubcommand::History { step } => history(ws, step, json),
        PromptSubcommand::Seed => seed(ws, json),
    }
}

fn list(ws: &Workspace, sort: PromptSort, json: bool) -> Result<()> {
    let prompts = ws.block_on(|store, _| async move {
        store
            .active_prompts(sort)
            .await
            .context("failed to list prompts")
    })?;

    if json {
        return print_json(&prompts);
    }
    let rows = prompts
        .iter()
        .map(|p| {
            vec![
                p.step_number.get().to_string(),
                p.name.clone(),
                format!("v{}", p.version),
                or_dash(p.model_name.clone()),
                p.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["#", "NAME", "VERSION", "MODEL", "UPDATED"], rows);
    Ok(())
}

fn show(ws: &Workspace, step: StepNumber, json: bool) -> Result<()> {
    let prompt = ws.block_on(|store, _| async move { Ok(store.active_prompt(step).await?) })?;

    if json {
        return print_json(&prompt);
    }
    println!(
        "{} v{} ({})",
        prompt.name,
        prompt.version,
        prompt.model_name.as_deref().unwrap_or("default model")
    );
    println!();
    println!("[system]");
    println!("{}", prompt.system_prompt_text);
    println!();
    println!("[user]");
    println!("{}", prompt.user_prompt_text);
    Ok(())
}

fn edit_prompt(ws: &Workspace, step: StepNumber, edit: PromptEdit, json: bool) -> Result<()> {
    edit.validate()?;
    let prompt = ws.block_on(|store, _| async move {
        store
            .create_prompt_version(step, &edit)
            .await
            .context("failed to save prompt version")
    })?;

    if json {
        print_json(&prompt)
    } else {
        println!("Saved {} as version {}", prompt.name, prompt.version);
        Ok(())
    }
}

fn history(ws: &Workspace, step: StepNumber, json: bool) -> Result<()> {
    let versions = ws.block_on(|store, _| async move { Ok(store.prompt_history(step).await?) })?;

    if json {
        return print_json(&versions);
    }
    let rows = versions
        .iter()
        .map(|p| {
            vec![
                format!("v{}", p.version),
                if p.is_active { "*".into() } else { String::new() },
                p.created_at.format("%Y-%m-%d %H:%M").to_string(),
                truncate(&p.user_prompt_text, 50),
            ]
        })
        .collect();
    print_table(&["VERSION", "ACTIVE", "CREATED", "PROMPT"], rows);
    Ok(())
}

fn seed(ws: &Workspace, json: bool) -> Result<()> {
    let seeded = ws.block_on(|store, _| async move {
        store
            .seed_prompts()
            .await
            .context("failed to seed prompts")
    })?;

    if json {
        return print_json(&seeded);
    }
    if seeded.is_empty() {
        println!("All steps already have an active prompt.");
    } else {
        for p in &seeded {
            println!("Seeded {} v{}", p.name, p.version);
        }
    }
    Ok(())
}
