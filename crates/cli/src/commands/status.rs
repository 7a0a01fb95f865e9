//! Agent health and pipeline statistics

use anyhow::Result;
use cascade_lib::ComponentStatus;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_rows, print_warning, OutputFormat};

/// Row for component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Row for stage census table
#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "Tier")]
    granularity: String,
    #[tabled(rename = "Workers")]
    workers: usize,
    #[tabled(rename = "Streams")]
    states: usize,
}

fn status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

/// Show agent health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health) = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health),
        OutputFormat::Table => {
            println!(
                "Overall: {}",
                color_status(status_label(health.status)).bold()
            );
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_label(component.status)),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows, &health, format);
        }
    }

    Ok(())
}

/// Show agent pipeline statistics
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats = client.stats().await?;

    match format {
        OutputFormat::Json => print_json(&stats),
        OutputFormat::Table => {
            println!("{}", "Pipeline Statistics".bold());
            println!("{}", "=".repeat(60));
            println!("Instance:      {}", stats.instance.cyan());
            println!("Emitted:       {}", stats.source.emitted);
            println!("Acked:         {}", stats.source.acked);
            println!("Failed:        {}", stats.source.failed);
            println!("Redelivered:   {}", stats.source.redelivered);
            println!("Dead-lettered: {}", stats.source.dead_lettered);
            println!("In flight:     {}", stats.source.in_flight);
            if stats.source.dead_lettered > 0 {
                print_warning("Some units exhausted their redelivery attempts");
            }
            println!();

            let rows: Vec<StageRow> = stats
                .stages
                .iter()
                .map(|stage| StageRow {
                    granularity: stage.granularity.to_string(),
                    workers: stage.workers,
                    states: stage.states,
                })
                .collect();
            print_rows(rows, &stats.stages, format);
        }
    }

    Ok(())
}
