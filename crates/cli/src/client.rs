//! API client for communicating with the opex agent

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the agent's HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.get_with_status::<serde_json::Value>(path).await?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            anyhow::bail!("API error ({}): {}", status, message);
        }

        serde_json::from_value(body).context("Failed to parse response")
    }

    /// Make a GET request whose body is meaningful whatever the status,
    /// such as health probes answering 503 with a JSON report
    pub async fn get_with_status<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        let parsed = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse response ({status}): {body}"))?;

        Ok((status, parsed))
    }

    /// Fetch an exported dataset by name
    pub async fn dataset<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.get(&format!("api/v1/datasets/{name}")).await
    }
}

// API response types

/// Agent settings relevant to rendering values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub cost_model: String,
    pub currency_symbol: String,
    pub polling_interval_sec: u64,
    pub billing_hourly_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetList {
    pub datasets: Vec<String>,
}

/// Node snapshot keyed by node name
pub type NodeMap = BTreeMap<String, Node>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    /// Empty when no recognized condition is set
    pub state: String,
    pub cpu_capacity: f64,
    pub cpu_allocatable: f64,
    pub cpu_usage: Option<f64>,
    pub mem_capacity: f64,
    pub mem_allocatable: f64,
    pub mem_usage: Option<f64>,
    #[serde(default)]
    pub pods_running: Vec<PodSummary>,
    #[serde(default)]
    pub pods_not_running: Vec<PodSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub name: String,
    #[serde(rename = "dateUTC")]
    pub date_utc: String,
    pub usage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramPoint {
    pub stack: String,
    pub usage: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
    #[serde(default)]
    pub last_cycle_timestamp: Option<i64>,
    #[serde(default)]
    pub last_export_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub reason: Option<String>,
}
