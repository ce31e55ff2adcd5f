//! Schema command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use tributary_client::OrchestratorClient;
use tributary_core::domain::schema::{Column, DatasetSchema, Registration};

use crate::config::Config;

/// Schema subcommands
#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Show the latest schema of a dataset
    Get {
        /// Dataset name
        dataset: String,
    },
    /// Show every registered version of a dataset
    History {
        /// Dataset name
        dataset: String,
    },
    /// Register a schema from a JSON array of columns
    Register {
        /// Dataset name
        dataset: String,

        /// Path to a JSON file like [{"name": "id", "data_type": "bigint"}]
        #[arg(short, long)]
        file: String,

        /// Accept breaking changes
        #[arg(long)]
        allow_override: bool,
    },
}

/// Handle schema commands
pub async fn handle_schema_command(command: SchemaCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        SchemaCommands::Get { dataset } => {
            let schema = client.get_schema(&dataset).await?;
            print_schema(&schema);
            Ok(())
        }
        SchemaCommands::History { dataset } => schema_history(&client, &dataset).await,
        SchemaCommands::Register {
            dataset,
            file,
            allow_override,
        } => register_schema(&client, &dataset, &file, allow_override).await,
    }
}

async fn schema_history(client: &OrchestratorClient, dataset: &str) -> Result<()> {
    let versions = client.schema_history(dataset).await?;

    if versions.is_empty() {
        println!(
            "{}",
            format!("No schema registered for {}.", dataset).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} version(s) of {}:", versions.len(), dataset).bold()
    );
    println!();
    for schema in &versions {
        print_schema(schema);
        println!();
    }
    Ok(())
}

async fn register_schema(
    client: &OrchestratorClient,
    dataset: &str,
    path: &str,
    allow_override: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file: {}", path))?;
    let columns: Vec<Column> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse columns: {}", path))?;

    match client.register_schema(dataset, columns, allow_override).await? {
        Registration::Accepted {
            version,
            changed: true,
        } => {
            println!(
                "{}",
                format!("✓ Registered {} v{}", dataset, version).green().bold()
            );
        }
        Registration::Accepted { version, .. } => {
            println!("{}", format!("Schema unchanged at v{}.", version).dimmed());
        }
        Registration::Drift {
            latest_version,
            diff,
        } => {
            println!(
                "{}",
                format!("✗ Breaking change against v{}", latest_version)
                    .red()
                    .bold()
            );
            println!("  {}", diff.describe());
            println!(
                "  {}",
                "Re-run with --allow-override to accept it.".dimmed()
            );
        }
    }
    Ok(())
}

fn print_schema(schema: &DatasetSchema) {
    println!(
        "  {} {} v{} {}",
        "▸".cyan(),
        schema.dataset.bold(),
        schema.version,
        schema
            .registered_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    for column in &schema.columns {
        println!("    {:<24} {}", column.name, column.data_type.dimmed());
    }
}
