//! Agent health and dataset availability commands

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, DatasetList, HealthResponse, ReadinessResponse, Settings};
use crate::config::Config;
use crate::output::{color_status, print_success, print_table, print_warning, OutputFormat};

/// Row for component health table
#[derive(Tabled, Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct HealthReport {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

/// Show agent health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.get_with_status("healthz").await?;
    let (_, readiness): (_, ReadinessResponse) = client.get_with_status("readyz").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&HealthReport { health, readiness })?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Agent Health".bold());
            println!("{}", "=".repeat(50));
            println!("Status:                 {}", color_status(&health.status));
            if readiness.ready {
                println!("Ready:                  {}", "yes".green());
            } else {
                println!(
                    "Ready:                  {} ({})",
                    "no".red(),
                    readiness.reason.as_deref().unwrap_or("unknown reason")
                );
            }
            println!(
                "Last cycle:             {}",
                format_timestamp(health.last_cycle_timestamp)
            );
            println!(
                "Last export:            {}",
                format_timestamp(health.last_export_timestamp)
            );
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_table(&rows, format);
        }
    }

    Ok(())
}

fn format_timestamp(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".dimmed().to_string())
}

/// Show exported datasets and the agent's cost settings
pub async fn show_datasets(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let settings: Settings = client.get("api/v1/settings").await?;
    let list: DatasetList = client.get("api/v1/datasets").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "settings": settings, "datasets": list.datasets });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            println!("Cost model:             {}", settings.cost_model.cyan());
            match settings.billing_hourly_rate {
                Some(rate) => println!(
                    "Billing hourly rate:    {}{:.2}",
                    settings.currency_symbol, rate
                ),
                None => println!("Billing hourly rate:    {}", "not set".dimmed()),
            }
            println!("Polling interval:       {}s", settings.polling_interval_sec);
            println!();

            if list.datasets.is_empty() {
                print_warning("No dataset exported yet");
            }
            for name in &list.datasets {
                println!("  {}", name);
            }
        }
    }

    Ok(())
}

/// Persist the agent URL in the CLI configuration file
pub fn set_api_url(api_url: &str) -> Result<()> {
    url::Url::parse(api_url)?;
    let mut config = Config::load()?;
    config.api_url = Some(api_url.to_string());
    let path = config.save()?;
    print_success(&format!("Saved API URL to {}", path.display()));
    Ok(())
}
