//! HTTP client for the Kubernetes API server and metrics extension

use super::{ApiEndpoint, ClusterSource};
use crate::observability::OpexMetrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, RequestBuilder, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Authentication material presented to the API server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClusterAuth {
    /// No credentials, e.g. through `kubectl proxy`
    #[default]
    None,
    /// Bearer token, e.g. a service account token
    Bearer(String),
    /// HTTP basic authentication
    Basic { username: String, password: String },
    /// Client certificate and key, both PEM encoded
    ClientCert { cert_path: PathBuf, key_path: PathBuf },
}

/// Configuration for the cluster API client
#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    /// API server base URL (e.g., "https://kubernetes.default.svc")
    pub endpoint: String,
    /// Whether to verify the server certificate
    pub verify_tls: bool,
    /// Extra CA bundle used to verify the server
    pub ca_cert_path: Option<PathBuf>,
    /// Credentials
    pub auth: ClusterAuth,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8001".to_string(),
            verify_tls: true,
            ca_cert_path: None,
            auth: ClusterAuth::None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cluster API client pulling raw list payloads
pub struct K8sApiClient {
    client: Client,
    base_url: String,
    auth: ClusterAuth,
    metrics: OpexMetrics,
}

impl K8sApiClient {
    /// Create a new client from the given configuration
    pub fn new(config: ClusterClientConfig) -> Result<Self> {
        Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid cluster API endpoint {}", config.endpoint))?;

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(ca_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_path)
                .with_context(|| format!("Failed to read CA bundle {}", ca_path.display()))?;
            let cert = Certificate::from_pem(&pem).context("Invalid CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }

        if let ClusterAuth::ClientCert {
            cert_path,
            key_path,
        } = &config.auth
        {
            let mut pem = std::fs::read(cert_path).with_context(|| {
                format!("Failed to read client certificate {}", cert_path.display())
            })?;
            let key = std::fs::read(key_path)
                .with_context(|| format!("Failed to read client key {}", key_path.display()))?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
            let identity = Identity::from_pem(&pem).context("Invalid client certificate")?;
            builder = builder.identity(identity);
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            auth: config.auth,
            metrics: OpexMetrics::new(),
        })
    }

    /// Full URL of an endpoint, keeping any path prefix of the base URL
    pub fn url_for(&self, endpoint: ApiEndpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            ClusterAuth::Bearer(token) => request.bearer_auth(token),
            ClusterAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            ClusterAuth::None | ClusterAuth::ClientCert { .. } => request,
        }
    }
}

#[async_trait]
impl ClusterSource for K8sApiClient {
    async fn fetch(&self, endpoint: ApiEndpoint) -> Option<String> {
        let url = self.url_for(endpoint);
        debug!(url = %url, "Pulling cluster API");

        let response = match self.authorize(self.client.get(&url)).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %url, error = %e, "HTTP error requesting cluster API");
                self.metrics.inc_api_errors();
                return None;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(url = %url, error = %e, "Failed to read cluster API response");
                self.metrics.inc_api_errors();
                return None;
            }
        };

        if status != StatusCode::OK {
            error!(url = %url, status = %status, body = %body, "Cluster API returned an error");
            self.metrics.inc_api_errors();
            return None;
        }

        Some(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(url: &str, auth: ClusterAuth) -> K8sApiClient {
        K8sApiClient::new(ClusterClientConfig {
            endpoint: url.to_string(),
            auth,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let result = K8sApiClient::new(ClusterClientConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_url_keeps_path_prefix() {
        let client = client_for("https://rancher.example/k8s/clusters/c-1/", ClusterAuth::None);
        assert_eq!(
            client.url_for(ApiEndpoint::PodMetrics),
            "https://rancher.example/k8s/clusters/c-1/apis/metrics.k8s.io/v1beta1/pods"
        );
    }

    #[tokio::test]
    async fn test_fetch_returns_body_on_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/nodes")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"items": []}"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), ClusterAuth::Bearer("secret".to_string()));
        let body = client.fetch(ApiEndpoint::Nodes).await;

        mock.assert_async().await;
        assert_eq!(body.as_deref(), Some(r#"{"items": []}"#));
    }

    #[tokio::test]
    async fn test_fetch_returns_none_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/pods")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = client_for(&server.url(), ClusterAuth::None);
        assert_eq!(client.fetch(ApiEndpoint::Pods).await, None);
    }

    #[tokio::test]
    async fn test_fetch_returns_none_when_unreachable() {
        // Port 9 (discard) is not expected to have an HTTP server listening
        let client = K8sApiClient::new(ClusterClientConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.fetch(ApiEndpoint::Namespaces).await, None);
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/namespaces")
            .match_header("authorization", "Basic YWRtaW46cGFzcw==")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = client_for(
            &server.url(),
            ClusterAuth::Basic {
                username: "admin".to_string(),
                password: "pass".to_string(),
            },
        );
        assert!(client.fetch(ApiEndpoint::Namespaces).await.is_some());
        mock.assert_async().await;
    }
}
