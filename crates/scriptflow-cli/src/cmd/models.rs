use crate::output::{print_json, print_table, truncate};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use clap::Subcommand;
use scriptflow_core::models::ModelCatalog;

#[derive(Subcommand)]
pub enum ModelsSubcommand {
    /// List models from the allowed providers
    List {
        /// Only show one provider (openai, google, anthropic, perplexity)
        #[arg(long)]
        provider: Option<String>,
    },
}

pub fn run(_ws: &Workspace, subcmd: ModelsSubcommand, json: bool) -> Result<()> {
    match subcmd {
        ModelsSubcommand::List { provider } => list(provider.as_deref(), json),
    }
}

fn list(provider: Option<&str>, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let catalog = ModelCatalog::new(reqwest::Client::new());
    let mut models = rt
        .block_on(catalog.fetch())
        .context("failed to fetch model catalog")?;
    if let Some(p) = provider {
        models.retain(|m| m.provider == p);
    }

    if json {
        return print_json(&models);
    }
    if models.is_empty() {
        println!("No models.");
        return Ok(());
    }
    let rows = models
        .iter()
        .map(|m| {
            vec![
                m.id.clone(),
                m.provider.clone(),
                m.context_length.to_string(),
                truncate(&m.name, 40),
            ]
        })
        .collect();
    print_table(&["ID", "PROVIDER", "CONTEXT", "NAME"], rows);
    Ok(())
}
