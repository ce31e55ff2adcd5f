//! Pipeline command handlers
//!
//! Handles pipeline registration, listing, viewing and deletion.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use tributary_client::OrchestratorClient;
use tributary_core::domain::pipeline::PipelineDefinition;
use tributary_core::dto::pipeline::{CreatePipeline, PipelineSummary};

use crate::config::Config;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Register a pipeline from a JSON definition file
    Create {
        /// Path to the JSON definition (name, dataset, config)
        #[arg(short, long)]
        file: String,

        /// Override the pipeline name from the file
        #[arg(short, long)]
        name: Option<String>,

        /// Override the description from the file
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline name
        name: String,
    },
    /// Delete a pipeline
    Delete {
        /// Pipeline name
        name: String,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        PipelineCommands::Create {
            file,
            name,
            description,
        } => create_pipeline(&client, &file, name, description).await,
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { name } => get_pipeline(&client, &name).await,
        PipelineCommands::Delete { name } => delete_pipeline(&client, &name).await,
    }
}

/// Read a definition file and apply command-line overrides
fn load_definition(
    path: &str,
    name_override: Option<String>,
    description_override: Option<String>,
) -> Result<CreatePipeline> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path))?;
    let mut req: CreatePipeline = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline definition: {}", path))?;

    if let Some(name) = name_override {
        req.name = name;
    }
    if description_override.is_some() {
        req.description = description_override;
    }
    Ok(req)
}

async fn create_pipeline(
    client: &OrchestratorClient,
    path: &str,
    name_override: Option<String>,
    description_override: Option<String>,
) -> Result<()> {
    let req = load_definition(path, name_override, description_override)?;
    let pipeline = client.create_pipeline(req).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:      {}", pipeline.id.to_string().cyan());
    println!("  Name:    {}", pipeline.name.bold());
    println!("  Dataset: {}", pipeline.dataset.dimmed());

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, name: &str) -> Result<()> {
    let pipeline = client.get_pipeline(name).await?;
    print_pipeline_details(&pipeline);
    Ok(())
}

async fn delete_pipeline(client: &OrchestratorClient, name: &str) -> Result<()> {
    client.delete_pipeline(name).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", name)
            .green()
            .bold()
    );

    Ok(())
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    Dataset: {}", pipeline.dataset);
    if let Some(desc) = &pipeline.description {
        println!("    {}", desc.dimmed());
    }
    if let Some(schedule) = &pipeline.schedule {
        println!("    Every:   {}s", schedule.every_secs);
    }
    println!(
        "    Created: {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_pipeline_details(pipeline: &PipelineDefinition) {
    let config = &pipeline.config;

    println!("{}", "Pipeline Details".bold().underline());
    println!();
    println!("  {}  {}", "ID:".bold(), pipeline.id.to_string().cyan());
    println!("  {}  {}", "Name:".bold(), pipeline.name);
    println!("  {}  {}", "Dataset:".bold(), pipeline.dataset);
    if let Some(desc) = &pipeline.description {
        println!("  {}  {}", "Description:".bold(), desc);
    }
    println!();
    println!("  {}", "Configuration:".bold());
    println!("    Max attempts:  {}", config.max_attempts);
    println!(
        "    Destination:   {} (keys: {})",
        config.destination.table,
        config.destination.key_columns.join(", ")
    );
    match &config.schedule {
        Some(schedule) => println!("    Schedule:      every {}s", schedule.every_secs),
        None => println!("    Schedule:      {}", "manual".dimmed()),
    }
    println!(
        "    Quality rules: {} (threshold {})",
        config.quality.rules.len(),
        config.quality.default_threshold
    );
    println!();
    println!(
        "  {}  {}",
        "Created:".bold(),
        pipeline.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  {}  {}",
        "Updated:".bold(),
        pipeline.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn definition_file(body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tributary-{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const DEFINITION: &str = r#"{
        "name": "daily-student-perf",
        "dataset": "student_perf",
        "config": {
            "destination": { "table": "student_perf", "key_columns": ["student_id"] }
        }
    }"#;

    #[test]
    fn test_load_definition_applies_overrides() {
        let path = definition_file(DEFINITION);
        let req = load_definition(
            path.to_str().unwrap(),
            Some("weekly-student-perf".to_string()),
            Some("Weekly rollup".to_string()),
        )
        .unwrap();

        assert_eq!(req.name, "weekly-student-perf");
        assert_eq!(req.description.as_deref(), Some("Weekly rollup"));
        assert_eq!(req.config.destination.key_columns, vec!["student_id"]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_definition_reports_bad_json() {
        let path = definition_file("{ not json");
        let err = load_definition(path.to_str().unwrap(), None, None).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
        std::fs::remove_file(path).unwrap();
    }
}
