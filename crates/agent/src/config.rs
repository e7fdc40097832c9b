//! Agent configuration

use anyhow::{Context, Result};
use opex_lib::analytics::{CostModel, ExporterConfig};
use opex_lib::cluster::{ClusterAuth, ClusterClientConfig, CollectorConfig, NamespaceFilter};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration, read from `KOA_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Cluster API base URL
    #[serde(default = "default_k8s_api_endpoint")]
    pub k8s_api_endpoint: String,

    #[serde(default = "default_true")]
    pub k8s_api_verify_ssl: bool,

    #[serde(default)]
    pub k8s_auth_token: Option<String>,

    /// File holding a bearer token, takes precedence over `k8s_auth_token`
    #[serde(default)]
    pub k8s_auth_token_file: Option<PathBuf>,

    #[serde(default)]
    pub k8s_auth_username: Option<String>,

    #[serde(default)]
    pub k8s_auth_password: Option<String>,

    #[serde(default)]
    pub k8s_auth_client_cert: Option<PathBuf>,

    #[serde(default)]
    pub k8s_auth_client_cert_key: Option<PathBuf>,

    /// CA bundle used to verify the cluster API
    #[serde(default)]
    pub k8s_cacert: Option<PathBuf>,

    /// Directory of the series files
    #[serde(default = "default_db_location")]
    pub db_location: PathBuf,

    /// Directory of the exported datasets
    #[serde(default = "default_frontend_data_location")]
    pub frontend_data_location: PathBuf,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_sec: u64,

    #[serde(default = "default_cost_model")]
    pub cost_model: String,

    /// Negative means unset
    #[serde(default = "default_billing_hourly_rate")]
    pub billing_hourly_rate: f64,

    #[serde(default = "default_currency_symbol")]
    pub billing_currency_symbol: String,

    /// Comma-separated namespace globs
    #[serde(default = "default_included_namespaces")]
    pub included_namespaces: String,

    #[serde(default)]
    pub excluded_namespaces: String,

    /// Port of the health, metrics and datasets server
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub enable_debug: bool,
}

fn default_k8s_api_endpoint() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_true() -> bool {
    true
}

fn default_db_location() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
    PathBuf::from(home).join(".kube-opex-analytics").join("db")
}

fn default_frontend_data_location() -> PathBuf {
    PathBuf::from("./static/data")
}

fn default_polling_interval() -> u64 {
    300
}

fn default_cost_model() -> String {
    CostModel::Cumulative.to_string()
}

fn default_billing_hourly_rate() -> f64 {
    -1.0
}

fn default_currency_symbol() -> String {
    "$".to_string()
}

fn default_included_namespaces() -> String {
    "*".to_string()
}

fn default_listen_port() -> u16 {
    5483
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from the given variables instead of the process
    /// environment, when provided
    pub fn load_from(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("KOA")
                    .prefix_separator("_")
                    .source(vars),
            )
            .build()
            .context("Failed to read KOA_* environment")?;

        config
            .try_deserialize()
            .context("Invalid KOA_* configuration")
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_sec.max(1))
    }

    /// Billing hourly rate, if a strictly positive one is configured
    pub fn billing_rate(&self) -> Option<f64> {
        (self.billing_hourly_rate > 0.0).then_some(self.billing_hourly_rate)
    }

    pub fn cost_model(&self) -> Result<CostModel> {
        self.cost_model
            .parse::<CostModel>()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid KOA_COST_MODEL")
    }

    pub fn namespace_filter(&self) -> NamespaceFilter {
        NamespaceFilter::from_lists(&self.included_namespaces, &self.excluded_namespaces)
    }

    /// Pick the cluster authentication
    ///
    /// Client certificate first, then bearer token (file before inline
    /// value), then basic auth, else none.
    pub fn cluster_auth(&self) -> Result<ClusterAuth> {
        if let (Some(cert), Some(key)) = (&self.k8s_auth_client_cert, &self.k8s_auth_client_cert_key)
        {
            return Ok(ClusterAuth::ClientCert {
                cert_path: cert.clone(),
                key_path: key.clone(),
            });
        }

        if let Some(path) = &self.k8s_auth_token_file {
            let token = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read token file {}", path.display()))?;
            return Ok(ClusterAuth::Bearer(token.trim().to_string()));
        }

        if let Some(token) = self.k8s_auth_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(ClusterAuth::Bearer(token.clone()));
        }

        if let Some(username) = self.k8s_auth_username.as_ref().filter(|u| !u.is_empty()) {
            return Ok(ClusterAuth::Basic {
                username: username.clone(),
                password: self.k8s_auth_password.clone().unwrap_or_default(),
            });
        }

        Ok(ClusterAuth::None)
    }

    pub fn client_config(&self) -> Result<ClusterClientConfig> {
        Ok(ClusterClientConfig {
            endpoint: self.k8s_api_endpoint.clone(),
            verify_tls: self.k8s_api_verify_ssl,
            ca_cert_path: self.k8s_cacert.clone(),
            auth: self.cluster_auth()?,
            ..Default::default()
        })
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: self.polling_interval(),
            filter: self.namespace_filter(),
            data_dir: self.frontend_data_location.clone(),
            billing_hourly_rate: self.billing_rate(),
        }
    }

    pub fn exporter_config(&self) -> Result<ExporterConfig> {
        Ok(ExporterConfig {
            interval: ExporterConfig::interval_for(self.polling_interval()),
            data_dir: self.frontend_data_location.clone(),
            cost_model: self.cost_model()?,
            billing_hourly_rate: self.billing_rate(),
        })
    }

    /// Problems worth a warning at startup; none of them stops the agent
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.polling_interval_sec == 0 {
            warnings.push("KOA_POLLING_INTERVAL_SEC is 0, using 1 second".to_string());
        }
        if self.billing_hourly_rate < 0.0 && self.billing_hourly_rate != -1.0 {
            warnings.push(format!(
                "KOA_BILLING_HOURLY_RATE {} is negative, treating it as unset",
                self.billing_hourly_rate
            ));
        }
        if matches!(self.cost_model(), Ok(CostModel::ChargeBack)) && self.billing_rate().is_none()
        {
            warnings.push(
                "CHARGE_BACK cost model needs a positive KOA_BILLING_HOURLY_RATE, costs will be 0"
                    .to_string(),
            );
        }
        if self.k8s_auth_client_cert.is_some() != self.k8s_auth_client_cert_key.is_some() {
            warnings.push(
                "KOA_K8S_AUTH_CLIENT_CERT and KOA_K8S_AUTH_CLIENT_CERT_KEY must be set together"
                    .to_string(),
            );
        }

        warnings
    }
}
