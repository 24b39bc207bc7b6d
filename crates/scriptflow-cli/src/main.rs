mod cmd;
mod output;
mod workspace;

use clap::{Parser, Subcommand};
use cmd::{
    models::ModelsSubcommand, project::ProjectSubcommand, prompt::PromptSubcommand,
    step::StepSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "scriptflow",
    about = "Drive the transcript analysis, research and outline pipeline for YouTube scripts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./scriptflow.yaml when present)
    #[arg(long, global = true, env = "SCRIPTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Acting user id; projects are scoped to their owner
    #[arg(long, global = true, env = "SCRIPTFLOW_USER")]
    user: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        subcommand: ProjectSubcommand,
    },

    /// Inspect, run and record pipeline steps
    Step {
        #[command(subcommand)]
        subcommand: StepSubcommand,
    },

    /// Manage versioned step prompts
    Prompt {
        #[command(subcommand)]
        subcommand: PromptSubcommand,
    },

    /// Browse the model catalog
    Models {
        #[command(subcommand)]
        subcommand: ModelsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = workspace::Workspace::load(cli.config.as_deref(), cli.user).and_then(|ws| {
        match cli.command {
            Commands::Serve { port } => cmd::serve::run(ws, port),
            Commands::Project { subcommand } => cmd::project::run(&ws, subcommand, cli.json),
            Commands::Step { subcommand } => cmd::step::run(&ws, subcommand, cli.json),
            Commands::Prompt { subcommand } => cmd::prompt::run(&ws, subcommand, cli.json),
            Commands::Models { subcommand } => cmd::models::run(&ws, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
