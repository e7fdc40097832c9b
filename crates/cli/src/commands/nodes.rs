//! Node snapshot command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, Node, NodeMap};
use crate::output::{color_status, format_bytes, format_cpu, format_optional, print_table, OutputFormat};

/// Row for nodes table
#[derive(Tabled, Serialize)]
struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "CPU Used")]
    cpu_usage: String,
    #[tabled(rename = "CPU Alloc")]
    cpu_allocatable: String,
    #[tabled(rename = "Mem Used")]
    mem_usage: String,
    #[tabled(rename = "Mem Alloc")]
    mem_allocatable: String,
    #[tabled(rename = "Pods")]
    pods: String,
}

impl From<&Node> for NodeRow {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            state: color_status(&node.state),
            cpu_usage: format_optional(node.cpu_usage, format_cpu),
            cpu_allocatable: format_cpu(node.cpu_allocatable),
            mem_usage: format_optional(node.mem_usage, format_bytes),
            mem_allocatable: format_bytes(node.mem_allocatable),
            pods: pod_counts(node),
        }
    }
}

fn pod_counts(node: &Node) -> String {
    match node.pods_not_running.len() {
        0 => node.pods_running.len().to_string(),
        pending => format!("{} (+{} not running)", node.pods_running.len(), pending),
    }
}

/// Show the last node snapshot
pub async fn show_nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let nodes: NodeMap = client.dataset("nodes").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&nodes)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Cluster Nodes".bold());
            let rows: Vec<NodeRow> = nodes.values().map(NodeRow::from).collect();
            print_table(&rows, format);
        }
    }

    Ok(())
}
