//! Environment configuration.
//!
//! Every recognised variable maps 1:1 onto a field here (`SERVER_PORT` →
//! `server_port`, and so on), loaded through a `config` environment source
//! after an optional `.env` file. Unset variables take the documented
//! defaults.

use std::time::Duration;

use serde::Deserialize;

use cache::CacheOptions;
use registry::RegistryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct FocusConfig {
    /// HTTP port of the service.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Upstream FHIR server holding ePI bundles.
    #[serde(default = "default_fhir_epi_url")]
    pub fhir_epi_url: String,

    /// Upstream FHIR server answering `$summary` for patients.
    #[serde(default = "default_fhir_ips_url")]
    pub fhir_ips_url: String,

    /// Upstream serving persona-vector profiles.
    #[serde(default = "default_profile_url")]
    pub profile_url: String,

    /// Optional templating collaborator rendering ePIs as HTML.
    #[serde(default)]
    pub epi_template_url: Option<String>,

    /// Label selector for preprocessor services.
    #[serde(default = "default_preprocessing_label_selector")]
    pub preprocessing_label_selector: String,

    /// Label selector for lens-selector services.
    #[serde(default = "default_focusing_label_selector")]
    pub focusing_label_selector: String,

    /// Comma-separated static preprocessor URLs appended after discovery.
    #[serde(default)]
    pub preprocessing_external_endpoints: String,

    /// Cache backend spec: `none`, `memory`, `redis`, or a `<`-chain.
    #[serde(default = "default_cache_backend")]
    pub preprocessing_cache_backend: String,

    #[serde(default = "default_cache_ttl_ms")]
    pub preprocessing_cache_ttl_ms: u64,

    #[serde(default = "default_cache_max_items")]
    pub preprocessing_cache_max_items: usize,

    /// Gzip values in the distributed store.
    #[serde(default)]
    pub preprocessing_cache_compress: bool,

    /// Namespaces every cache key.
    #[serde(default = "default_cache_schema_version")]
    pub preprocessing_cache_schema_version: String,

    /// Connection string for `redis` cache tokens.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Minimum level of the lens-execution-environment sink.
    #[serde(default = "default_lee_log_level")]
    pub lee_log_level: String,

    #[serde(default = "default_true")]
    pub lee_logging_enabled: bool,

    #[serde(default = "default_true")]
    pub lens_logging_enabled: bool,

    /// `standalone` selects container-runtime discovery; anything else the
    /// cluster orchestrator.
    #[serde(default)]
    pub environment: String,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            fhir_epi_url: default_fhir_epi_url(),
            fhir_ips_url: default_fhir_ips_url(),
            profile_url: default_profile_url(),
            epi_template_url: None,
            preprocessing_label_selector: default_preprocessing_label_selector(),
            focusing_label_selector: default_focusing_label_selector(),
            preprocessing_external_endpoints: String::new(),
            preprocessing_cache_backend: default_cache_backend(),
            preprocessing_cache_ttl_ms: default_cache_ttl_ms(),
            preprocessing_cache_max_items: default_cache_max_items(),
            preprocessing_cache_compress: false,
            preprocessing_cache_schema_version: default_cache_schema_version(),
            redis_url: None,
            lee_log_level: default_lee_log_level(),
            lee_logging_enabled: true,
            lens_logging_enabled: true,
            environment: String::new(),
        }
    }
}

impl FocusConfig {
    /// Load from the process environment, reading `.env` first when present.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.preprocessing_cache_ttl_ms)
    }

    /// Parsed static preprocessor endpoints.
    pub fn external_endpoints(&self) -> Vec<String> {
        self.preprocessing_external_endpoints
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn cache_options(&self) -> CacheOptions {
        let defaults = CacheOptions::default();
        CacheOptions {
            backend: self.preprocessing_cache_backend.clone(),
            ttl: self.cache_ttl(),
            max_items: self.preprocessing_cache_max_items,
            compress: self.preprocessing_cache_compress,
            schema_version: self.preprocessing_cache_schema_version.clone(),
            redis_url: self.redis_url.clone().unwrap_or(defaults.redis_url),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            preprocessing_selector: self.preprocessing_label_selector.clone(),
            focusing_selector: self.focusing_label_selector.clone(),
            external_endpoints: self.external_endpoints(),
        }
    }
}

fn default_server_port() -> u16 {
    3000
}

fn default_fhir_epi_url() -> String {
    "http://localhost:8080/epi/api/fhir".into()
}

fn default_fhir_ips_url() -> String {
    "http://localhost:8081/ips/api/fhir".into()
}

fn default_profile_url() -> String {
    "http://localhost:8082/profiles".into()
}

fn default_preprocessing_label_selector() -> String {
    "eu.gravitate-health.fosps.preprocessing=true".into()
}

fn default_focusing_label_selector() -> String {
    "eu.gravitate-health.fosps.focusing=true".into()
}

fn default_cache_backend() -> String {
    "memory".into()
}

fn default_cache_ttl_ms() -> u64 {
    1_200_000
}

fn default_cache_max_items() -> usize {
    1_000
}

fn default_cache_schema_version() -> String {
    "v1".into()
}

fn default_lee_log_level() -> String {
    "INFO".into()
}

fn default_true() -> bool {
    true
}
