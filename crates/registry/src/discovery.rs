//! Discovery back-ends.
//!
//! The registry only depends on the [`DiscoveryBackend`] contract: given a
//! label selector, return the base URLs of matching services in a stable
//! order. Two production back-ends exist — the cluster orchestrator
//! (Kubernetes service listing) and the container runtime (Docker Engine
//! API) — plus a static one for fixed deployments and tests.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("discovery query failed: {0}")]
    Query(String),
}

#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Base URLs of every service carrying `selector`, in listing order.
    async fn list_by_label(&self, selector: &str) -> Result<Vec<String>, DiscoveryError>;
}

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Cluster orchestrator back-end: lists labelled `Service` objects through
/// the in-cluster API and derives cluster-DNS base URLs from them.
pub struct KubernetesDiscovery {
    http: reqwest::Client,
    api_base: String,
    namespace: String,
    token: Option<String>,
}

impl KubernetesDiscovery {
    /// Build from the conventional in-cluster environment: the apiserver
    /// address from `KUBERNETES_SERVICE_HOST`/`_PORT` and the mounted
    /// service-account namespace/token/CA.
    pub fn from_cluster_env() -> Self {
        let host = env::var("KUBERNETES_SERVICE_HOST")
            .unwrap_or_else(|_| "kubernetes.default.svc".into());
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let namespace = read_mounted(&format!("{SERVICE_ACCOUNT_DIR}/namespace"))
            .unwrap_or_else(|| "default".into());
        let token = read_mounted(&format!("{SERVICE_ACCOUNT_DIR}/token"));

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(10));
        if let Ok(pem) = fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt")) {
            if let Ok(certificate) = reqwest::Certificate::from_pem(&pem) {
                builder = builder.add_root_certificate(certificate);
            }
        }
        let http = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            api_base: format!("https://{host}:{port}"),
            namespace,
            token,
        }
    }
}

#[async_trait]
impl DiscoveryBackend for KubernetesDiscovery {
    async fn list_by_label(&self, selector: &str) -> Result<Vec<String>, DiscoveryError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/services",
            self.api_base, self.namespace
        );
        let mut request = self.http.get(&url).query(&[("labelSelector", selector)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DiscoveryError::Query(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Query(format!(
                "service listing returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Query(e.to_string()))?;

        let mut urls = Vec::new();
        for item in body.get("items").and_then(Value::as_array).into_iter().flatten() {
            let Some(name) = item
                .pointer("/metadata/name")
                .and_then(Value::as_str)
            else {
                continue;
            };
            let port = item
                .pointer("/spec/ports/0/port")
                .and_then(Value::as_u64)
                .unwrap_or(80);
            urls.push(format!("http://{name}.{}.svc:{port}", self.namespace));
        }
        Ok(urls)
    }
}

/// Container-runtime back-end: lists labelled containers through the
/// Docker Engine HTTP API.
///
/// Only TCP `DOCKER_HOST` endpoints are spoken here; a unix socket needs a
/// local TCP proxy in front of it.
pub struct DockerDiscovery {
    http: reqwest::Client,
    host: String,
}

impl DockerDiscovery {
    pub fn from_env() -> Self {
        let host = env::var("DOCKER_HOST")
            .ok()
            .and_then(|raw| raw.strip_prefix("tcp://").map(|rest| format!("http://{rest}")))
            .unwrap_or_else(|| "http://localhost:2375".into());
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            host,
        }
    }
}

#[async_trait]
impl DiscoveryBackend for DockerDiscovery {
    async fn list_by_label(&self, selector: &str) -> Result<Vec<String>, DiscoveryError> {
        let filters = serde_json::json!({ "label": [selector] }).to_string();
        let response = self
            .http
            .get(format!("{}/containers/json", self.host))
            .query(&[("filters", filters.as_str())])
            .send()
            .await
            .map_err(|e| DiscoveryError::Query(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Query(format!(
                "container listing returned {}",
                response.status()
            )));
        }
        let containers: Value = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Query(e.to_string()))?;

        let mut urls = Vec::new();
        for container in containers.as_array().into_iter().flatten() {
            let Some(name) = container
                .pointer("/Names/0")
                .and_then(Value::as_str)
                .map(|n| n.trim_start_matches('/').to_owned())
            else {
                continue;
            };
            let port = container
                .pointer("/Ports/0/PrivatePort")
                .and_then(Value::as_u64)
                .unwrap_or(8080);
            urls.push(format!("http://{name}:{port}"));
        }
        Ok(urls)
    }
}

/// Fixed answers, keyed by selector. The fallback list answers selectors
/// with no dedicated entry.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    by_selector: HashMap<String, Vec<String>>,
    fallback: Vec<String>,
}

impl StaticDiscovery {
    pub fn new(by_selector: HashMap<String, Vec<String>>) -> Self {
        Self {
            by_selector,
            fallback: Vec::new(),
        }
    }

    /// Answer every selector with the same list.
    pub fn uniform(urls: Vec<String>) -> Self {
        Self {
            by_selector: HashMap::new(),
            fallback: urls,
        }
    }
}

#[async_trait]
impl DiscoveryBackend for StaticDiscovery {
    async fn list_by_label(&self, selector: &str) -> Result<Vec<String>, DiscoveryError> {
        Ok(self
            .by_selector
            .get(selector)
            .unwrap_or(&self.fallback)
            .clone())
    }
}

/// Pick the back-end for the configured environment: `standalone` means
/// the local container runtime, anything else the cluster orchestrator.
pub fn discovery_from_env(environment: &str) -> std::sync::Arc<dyn DiscoveryBackend> {
    if environment.eq_ignore_ascii_case("standalone") {
        std::sync::Arc::new(DockerDiscovery::from_env())
    } else {
        std::sync::Arc::new(KubernetesDiscovery::from_cluster_env())
    }
}

fn read_mounted(path: &str) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}
