//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod run;
mod schema;

use pipeline::PipelineCommands;
use run::RunCommands;
use schema::SchemaCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Trigger, inspect and cancel runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Inspect registered dataset schemas
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

/// Route a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Schema { command } => schema::handle_schema_command(command, config).await,
    }
}
