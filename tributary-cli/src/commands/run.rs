//! Run command handlers
//!
//! Triggers runs, follows them to completion, and shows their stage history.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tributary_client::OrchestratorClient;
use tributary_core::domain::run::{ALLOW_SCHEMA_OVERRIDE, RunRecord, RunState};
use tributary_core::domain::stage::StageStatus;
use tributary_core::dto::run::RunSummary;
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Trigger a run of a pipeline
    Trigger {
        /// Pipeline name
        pipeline: String,

        /// Parameters as key=value pairs (e.g., run_date=2026-10-18)
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,

        /// Accept breaking schema changes for this run
        #[arg(long)]
        allow_schema_override: bool,

        /// Follow the run until it finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Show a run and its stage attempts
    Get {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Request cancellation of a run
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// List recent runs of a pipeline
    List {
        /// Pipeline name
        pipeline: String,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Values that parse as JSON keep their type, everything else is a string
fn to_parameters(
    params: Vec<(String, String)>,
    allow_schema_override: bool,
) -> HashMap<String, JsonValue> {
    let mut parameters: HashMap<String, JsonValue> = params
        .into_iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(&v).unwrap_or(JsonValue::String(v));
            (k, value)
        })
        .collect();

    if allow_schema_override {
        parameters.insert(ALLOW_SCHEMA_OVERRIDE.to_string(), JsonValue::Bool(true));
    }
    parameters
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        RunCommands::Trigger {
            pipeline,
            param,
            allow_schema_override,
            wait,
        } => {
            let parameters = to_parameters(param, allow_schema_override);
            trigger_run(&client, &pipeline, parameters, wait).await
        }
        RunCommands::Get { id } => get_run(&client, &id).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
        RunCommands::List { pipeline, limit } => list_runs(&client, &pipeline, limit).await,
    }
}

async fn trigger_run(
    client: &OrchestratorClient,
    pipeline: &str,
    parameters: HashMap<String, JsonValue>,
    wait: bool,
) -> Result<()> {
    let run_id = match client.trigger_run(pipeline, parameters).await {
        Ok(id) => id,
        Err(e) if e.is_conflict() => {
            println!(
                "{}",
                format!("Pipeline {} already has an active run.", pipeline).yellow()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", "✓ Run triggered successfully!".green().bold());
    println!("  Run ID:   {}", run_id.to_string().cyan());
    println!("  Pipeline: {}", pipeline.bold());

    if wait {
        println!();
        let record = follow_run(client, run_id).await?;
        print_run_details(&record);
    }

    Ok(())
}

/// Poll the run, printing each state change, until it is terminal
async fn follow_run(client: &OrchestratorClient, run_id: Uuid) -> Result<RunRecord> {
    let mut last_state: Option<RunState> = None;
    loop {
        let record = client.get_run(run_id).await?;
        if last_state != Some(record.run.state) {
            println!("  {} {}", "→".dimmed(), colored_state(record.run.state));
            last_state = Some(record.run.state);
        }
        if record.run.is_terminal() {
            println!();
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

async fn get_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let record = client.get_run(run_id).await?;
    print_run_details(&record);
    Ok(())
}

async fn cancel_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.cancel_run(run_id).await?;

    if run.state.is_terminal() {
        println!(
            "{}",
            format!("Run {} already finished as {}.", run.id, run.state).yellow()
        );
    } else {
        println!("{}", "✓ Cancellation requested.".green().bold());
        println!("  Run ID: {}", run.id.to_string().cyan());
    }
    Ok(())
}

async fn list_runs(client: &OrchestratorClient, pipeline: &str, limit: u32) -> Result<()> {
    let runs = client.list_runs(pipeline, limit).await?;

    if runs.is_empty() {
        println!("{}", format!("No runs found for {}.", pipeline).yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

fn colored_state(state: RunState) -> ColoredString {
    match state {
        RunState::Succeeded => state.as_str().green(),
        RunState::Failed => state.as_str().red(),
        RunState::Cancelled => state.as_str().yellow(),
        _ => state.as_str().blue(),
    }
}

fn colored_status(status: StageStatus) -> ColoredString {
    match status {
        StageStatus::Succeeded => status.as_str().green(),
        StageStatus::Failed | StageStatus::TimedOut => status.as_str().red(),
        StageStatus::Cancelled => status.as_str().yellow(),
        _ => status.as_str().blue(),
    }
}

fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} {} [{}]",
        "▸".cyan(),
        run.id.to_string().bold(),
        colored_state(run.state)
    );
    if let Some(stage) = run.current_stage {
        println!("    Stage:     {}", stage);
    }
    println!(
        "    Triggered: {}",
        run.triggered_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(err) = &run.last_error {
        println!("    Error:     {} {}", err.code.red(), err.message.dimmed());
    }
    println!();
}

fn print_run_details(record: &RunRecord) {
    let run = &record.run;

    println!("{}", "Run Details".bold().underline());
    println!();
    println!("  {}  {}", "ID:".bold(), run.id.to_string().cyan());
    println!("  {}  {}", "Pipeline:".bold(), run.pipeline_name);
    println!("  {}  {}", "State:".bold(), colored_state(run.state));
    if let Some(stage) = run.current_stage {
        println!("  {}  {}", "Stage:".bold(), stage);
    }
    if !run.parameters.is_empty() {
        println!("  {}", "Parameters:".bold());
        for (key, value) in &run.parameters {
            println!("    {} = {}", key.cyan(), value);
        }
    }
    if let Some(err) = &run.last_error {
        println!(
            "  {}  [{}] {}: {}",
            "Error:".bold(),
            err.class,
            err.code.red(),
            err.message
        );
    }
    println!(
        "  {}  {}",
        "Triggered:".bold(),
        run.triggered_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(completed) = run.completed_at {
        println!(
            "  {}  {}",
            "Completed:".bold(),
            completed.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if record.stages.is_empty() {
        return;
    }
    println!();
    println!("  {}", "Stages:".bold());
    for attempt in &record.stages {
        println!(
            "    {:<16} #{:<2} {:<10} polls={}",
            attempt.stage.to_string(),
            attempt.attempt,
            colored_status(attempt.status),
            attempt.poll_count
        );
        if let Some(err) = &attempt.error {
            println!("      {} {}", err.code.red(), err.message.dimmed());
        }
        for violation in &attempt.violations {
            println!(
                "      {} {} on {}: {} rows ({:.2}% > {:.2}%)",
                "!".yellow(),
                violation.kind,
                violation.column,
                violation.count,
                violation.rate * 100.0,
                violation.threshold * 100.0
            );
        }
    }
}
