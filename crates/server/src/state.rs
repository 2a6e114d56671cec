use std::sync::Arc;
use std::time::Duration;

use cache::SharedCache;
use focusman::{FocusConfig, PreprocessingPipeline};
use lens::{LensLimits, LensRuntime, LogLevel, TracingSink};
use registry::{DiscoveryBackend, ServiceRegistry};

use crate::fhir::FhirClient;
use crate::render::HtmlRenderer;

/// Shared application state, assembled once at startup and threaded
/// through every handler.
#[derive(Clone)]
pub struct ServerState {
    pub config: FocusConfig,
    pub cache: SharedCache,
    pub registry: ServiceRegistry,
    pub pipeline: PreprocessingPipeline,
    pub lenses: Arc<LensRuntime>,
    pub fhir: FhirClient,
    pub renderer: Option<HtmlRenderer>,
}

impl ServerState {
    /// Production wiring: discovery back-end from the environment, cache
    /// hierarchy from the backend spec.
    pub async fn from_config(config: FocusConfig) -> anyhow::Result<Arc<Self>> {
        let discovery = registry::discovery_from_env(&config.environment);
        let cache = cache::build_cache(&config.cache_options()).await?;
        Ok(Self::assemble(config, discovery, cache))
    }

    /// Wiring with explicit collaborators; also the test entry point.
    pub fn assemble(
        config: FocusConfig,
        discovery: Arc<dyn DiscoveryBackend>,
        cache: SharedCache,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let registry = ServiceRegistry::new(discovery, http.clone(), config.registry_config());
        let pipeline = PreprocessingPipeline::new(Arc::clone(&cache), registry.clone());

        let lee_level = LogLevel::parse(&config.lee_log_level).unwrap_or(LogLevel::Info);
        let lenses = Arc::new(LensRuntime::new(
            LensLimits::default(),
            Arc::new(TracingSink::new(lee_level, config.lee_logging_enabled)),
            Arc::new(TracingSink::new(LogLevel::Debug, config.lens_logging_enabled)),
        ));

        let fhir = FhirClient::new(http.clone(), &config);
        let renderer = config
            .epi_template_url
            .clone()
            .map(|url| HtmlRenderer::new(http, url));

        Arc::new(Self {
            config,
            cache,
            registry,
            pipeline,
            lenses,
            fhir,
            renderer,
        })
    }
}
