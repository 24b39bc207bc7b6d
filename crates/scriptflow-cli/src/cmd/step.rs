use crate::output::{or_dash, print_json, print_table};
use crate::workspace::Workspace;
use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use scriptflow_core::clock::TokioClock;
use scriptflow_core::coordinator::{Coordinator, StepOutcome};
use scriptflow_core::gate;
use scriptflow_core::pipeline;
use scriptflow_core::step::StepWrite;
use scriptflow_core::tracker::StepTracker;
use scriptflow_core::types::{StepNumber, StepStatus};
use scriptflow_core::webhook::{ApiTrigger, Trigger, WebhookForwarder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand)]
pub enum StepSubcommand {
    /// Show every step of a project with its gate state
    Status { project: String },
    /// Trigger a step and wait for its result
    Run {
        project: String,
        /// Step number (1, 2 or 3)
        step: StepNumber,
        /// Trigger through a running server instead of calling webhooks directly
        #[arg(long)]
        api: Option<String>,
    },
    /// Record a step result by hand, as the automation service would
    Record {
        project: String,
        step: StepNumber,
        /// pending, processing, completed, error or timed_out
        #[arg(long)]
        status: StepStatus,
        /// Raw result body
        #[arg(long)]
        response: Option<String>,
        #[arg(long)]
        error: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        cost: Option<f64>,
    },
}

pub fn run(ws: &Workspace, subcmd: StepSubcommand, json: bool) -> Result<()> {
    match subcmd {
        StepSubcommand::Status { project } => status(ws, &project, json),
        StepSubcommand::Run { project, step, api } => run_step(ws, &project, step, api, json),
        StepSubcommand::Record {
            project,
            step,
            status,
            response,
            error,
            model,
            cost,
        } => record(
            ws,
            &project,
            step,
            StepWrite {
                status,
                raw_response: response,
                error_message: error,
                model_used: model,
                processing_cost: cost,
                ..Default::default()
            },
            json,
        ),
    }
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

fn status(ws: &Workspace, project: &str, json: bool) -> Result<()> {
    let user = ws.user()?.to_string();
    let id = project.to_string();
    let tracker = ws.block_on(|store, _| async move {
        store.get_project(&id, &user).await?;
        Ok(StepTracker::from_steps(store.list_steps(&id).await?))
    })?;
    let view = gate::view(&tracker);

    if json {
        return print_json(&view);
    }
    let rows = view
        .iter()
        .map(|v| {
            let row = tracker.get(v.step_number);
            vec![
                v.step_number.get().to_string(),
                v.name.to_string(),
                or_dash(v.status),
                v.affordance.to_string(),
                or_dash(row.and_then(|r| r.completed_at.map(|t| t.format("%Y-%m-%d %H:%M").to_string()))),
                or_dash(row.and_then(|r| r.error_message.clone())),
            ]
        })
        .collect();
    print_table(&["#", "STEP", "STATUS", "STATE", "COMPLETED", "ERROR"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn run_step(
    ws: &Workspace,
    project: &str,
    step: StepNumber,
    api: Option<String>,
    json: bool,
) -> Result<()> {
    let user = ws.user()?.to_string();
    let id = project.to_string();
    let config = ws.config.clone();

    let outcome = ws.block_on(|store, client| async move {
        let spec = pipeline::spec(step);
        let trigger: Arc<dyn Trigger> = match api {
            Some(base) => Arc::new(ApiTrigger::new(client, base)),
            None => {
                let forwarder =
                    WebhookForwarder::new(client, config.webhooks.clone(), config.webhook_timeout());
                if !forwarder.is_configured(spec) {
                    bail!("{}", spec.not_configured_message);
                }
                Arc::new(forwarder)
            }
        };
        let coordinator = Coordinator::new(
            store.clone(),
            trigger,
            Arc::new(TokioClock::new()),
            config.polling,
        );

        let mut project = store.get_project(&id, &user).await?;
        let mut tracker = StepTracker::from_steps(store.list_steps(&id).await?);

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        if !json {
            eprintln!(
                "Running {} for '{}' (polling every {}s, up to {}s)...",
                spec.name, project.title, config.polling.interval_secs, config.polling.ceiling_secs
            );
        }
        coordinator
            .run_step(&user, &mut project, &mut tracker, step, &cancel)
            .await
            .with_context(|| format!("failed to run step {step}"))
    })?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        StepOutcome::Completed(row) => {
            println!("{} completed.", row.step_name);
            if let Some(doc) = row.result_json() {
                println!();
                print_json(&doc)?;
            } else if let Some(text) = row.result_text() {
                println!();
                println!("{text}");
            }
            Ok(())
        }
        StepOutcome::TimedOut(row) => Err(anyhow!(
            "{}: {}",
            row.step_name,
            row.error_message.as_deref().unwrap_or("timed out")
        )),
        StepOutcome::Cancelled => Err(anyhow!("cancelled")),
    }
}

// ---------------------------------------------------------------------------
// record
// ---------------------------------------------------------------------------

fn record(ws: &Workspace, project: &str, step: StepNumber, mut write: StepWrite, json: bool) -> Result<()> {
    let user = ws.user()?.to_string();
    let id = project.to_string();
    write.updated_by = Some(user.clone());

    let row = ws.block_on(|store, _| async move {
        let mut project = store.get_project(&id, &user).await?;
        let row = store.write_step(&id, step, write).await?;
        let tracker = StepTracker::from_steps(store.list_steps(&id).await?);
        if project.sync_progress(&tracker) {
            store.save_project(&project, &user).await?;
        }
        Ok(row)
    })?;

    if json {
        print_json(&row)
    } else {
        println!("Step {} ({}) is now {}", step, row.step_name, row.status);
        Ok(())
    }
}
