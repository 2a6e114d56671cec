//! Runtime registry of preprocessor and lens-selector services.
//!
//! Discovery produces base URLs; the registry derives stable service names
//! from them, merges statically configured external endpoints, and keeps
//! the resulting maps behind an [`arc_swap::ArcSwap`] so readers always see
//! a whole map — the one before or the one after a completed refresh,
//! never a partial state. Refreshes are single-flight: concurrent callers
//! share one in-flight task and its eventual result.

pub mod discovery;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use thiserror::Error;

pub use discovery::{
    discovery_from_env, DiscoveryBackend, DiscoveryError, DockerDiscovery, KubernetesDiscovery,
    StaticDiscovery,
};

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("service discovery failed: {0}")]
    Discovery(String),

    #[error("service `{service}` unavailable: {detail}")]
    Upstream { service: String, detail: String },

    #[error("unknown preprocessor service `{0}`")]
    UnknownService(String),

    #[error("unknown lens `{0}`")]
    UnknownLens(String),
}

/// One named service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub base_url: String,
}

/// One discoverable lens, addressed by its registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LensEntry {
    /// Unique key exposed to clients (collisions carry `-2`, `-3`, …).
    pub key: String,
    /// Selector that owns the lens.
    pub selector: String,
    /// Name the lens goes by on that selector.
    pub lens_name: String,
}

/// A lens as fetched from its selector, script body still base64.
#[derive(Debug, Clone)]
pub struct LensPayload {
    pub key: String,
    pub data_b64: Option<String>,
    pub metadata: Value,
}

/// The whole registry state, replaced atomically per refresh.
#[derive(Debug, Default)]
pub struct RegistryMaps {
    preprocessors: Vec<ServiceEntry>,
    selectors: Vec<ServiceEntry>,
    lenses: Vec<LensEntry>,
}

impl RegistryMaps {
    pub fn preprocessor_names(&self) -> Vec<String> {
        self.preprocessors.iter().map(|e| e.name.clone()).collect()
    }

    pub fn preprocessor_url(&self, name: &str) -> Option<&str> {
        self.preprocessors
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.base_url.as_str())
    }

    pub fn selector_url(&self, name: &str) -> Option<&str> {
        self.selectors
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.base_url.as_str())
    }

    pub fn lens_keys(&self) -> Vec<String> {
        self.lenses.iter().map(|e| e.key.clone()).collect()
    }

    pub fn lens_entry(&self, key: &str) -> Option<&LensEntry> {
        self.lenses.iter().find(|e| e.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.preprocessors.is_empty() && self.selectors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Label selector for preprocessor services.
    pub preprocessing_selector: String,
    /// Label selector for lens-selector services.
    pub focusing_selector: String,
    /// Static preprocessor URLs appended after discovered ones.
    pub external_endpoints: Vec<String>,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<(), Arc<RegistryError>>>>;

struct RegistryInner {
    discovery: Arc<dyn DiscoveryBackend>,
    http: reqwest::Client,
    config: RegistryConfig,
    maps: ArcSwap<RegistryMaps>,
    refresh_slot: Mutex<Option<(u64, RefreshFuture)>>,
    refresh_seq: AtomicU64,
}

#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    pub fn new(
        discovery: Arc<dyn DiscoveryBackend>,
        http: reqwest::Client,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                discovery,
                http,
                config,
                maps: ArcSwap::from_pointee(RegistryMaps::default()),
                refresh_slot: Mutex::new(None),
                refresh_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Current registry state. Readers get a consistent snapshot.
    pub fn maps(&self) -> Arc<RegistryMaps> {
        self.inner.maps.load_full()
    }

    /// Re-run discovery and rebuild the maps, single-flight: while one
    /// refresh is in flight every caller awaits the same task. The slot is
    /// cleared on completion, success or not.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let (generation, shared) = {
            let mut slot = self.inner.refresh_slot.lock().expect("refresh slot lock");
            match slot.as_ref() {
                Some((generation, shared)) => (*generation, shared.clone()),
                None => {
                    let generation = self.inner.refresh_seq.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let shared = async move { refresh_inner(inner).await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Some((generation, shared.clone()));
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut slot = self.inner.refresh_slot.lock().expect("refresh slot lock");
        if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
            *slot = None;
        }
        drop(slot);

        result.map_err(|shared_err| (*shared_err).clone())
    }

    /// Refresh once if nothing has been discovered yet.
    pub async fn ensure_loaded(&self) -> Result<(), RegistryError> {
        if self.maps().is_empty() {
            self.refresh().await
        } else {
            Ok(())
        }
    }

    pub fn preprocessor_names(&self) -> Vec<String> {
        self.maps().preprocessor_names()
    }

    pub fn lens_keys(&self) -> Vec<String> {
        self.maps().lens_keys()
    }

    /// POST the document to the named preprocessor's `/preprocess`.
    ///
    /// An unknown name triggers exactly one refresh and a retry; a second
    /// miss is a hard [`RegistryError::UnknownService`].
    pub async fn call_preprocessor(
        &self,
        name: &str,
        body: &Value,
    ) -> Result<Value, RegistryError> {
        let base_url = match self.maps().preprocessor_url(name) {
            Some(url) => url.to_owned(),
            None => {
                if let Err(err) = self.refresh().await {
                    tracing::warn!(error = %err, service = name, "refresh before retry failed");
                }
                self.maps()
                    .preprocessor_url(name)
                    .map(str::to_owned)
                    .ok_or_else(|| RegistryError::UnknownService(name.to_owned()))?
            }
        };

        let url = format!("{}/preprocess", base_url.trim_end_matches('/'));
        let response = self
            .inner
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RegistryError::Upstream {
                service: name.to_owned(),
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(RegistryError::Upstream {
                service: name.to_owned(),
                detail: format!("preprocess returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| RegistryError::Upstream {
            service: name.to_owned(),
            detail: format!("invalid preprocess response: {e}"),
        })
    }

    /// Fetch a lens record from the selector that owns `key`.
    pub async fn fetch_lens(&self, key: &str) -> Result<LensPayload, RegistryError> {
        let entry = match self.maps().lens_entry(key).cloned() {
            Some(entry) => entry,
            None => {
                if let Err(err) = self.refresh().await {
                    tracing::warn!(error = %err, lens = key, "refresh before retry failed");
                }
                self.maps()
                    .lens_entry(key)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownLens(key.to_owned()))?
            }
        };
        let base_url = self
            .maps()
            .selector_url(&entry.selector)
            .map(str::to_owned)
            .ok_or_else(|| RegistryError::UnknownLens(key.to_owned()))?;

        let url = format!(
            "{}/lenses/{}",
            base_url.trim_end_matches('/'),
            entry.lens_name
        );
        let response =
            self.inner.http.get(&url).send().await.map_err(|e| RegistryError::Upstream {
                service: entry.selector.clone(),
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(RegistryError::Upstream {
                service: entry.selector.clone(),
                detail: format!("lens fetch returned {}", response.status()),
            });
        }
        let metadata: Value = response.json().await.map_err(|e| RegistryError::Upstream {
            service: entry.selector,
            detail: format!("invalid lens response: {e}"),
        })?;
        let data_b64 = metadata
            .pointer("/content/0/data")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(LensPayload {
            key: key.to_owned(),
            data_b64,
            metadata,
        })
    }
}

async fn refresh_inner(inner: Arc<RegistryInner>) -> Result<(), RegistryError> {
    let mut maps = RegistryMaps::default();

    let discovered = inner
        .discovery
        .list_by_label(&inner.config.preprocessing_selector)
        .await
        .map_err(|e| RegistryError::Discovery(e.to_string()))?;
    let mut used = HashMap::new();
    for base_url in discovered
        .into_iter()
        .chain(inner.config.external_endpoints.iter().cloned())
    {
        let name = unique_name(&mut used, host_of(&base_url));
        maps.preprocessors.push(ServiceEntry { name, base_url });
    }

    let selectors = inner
        .discovery
        .list_by_label(&inner.config.focusing_selector)
        .await
        .map_err(|e| RegistryError::Discovery(e.to_string()))?;
    let mut used_selectors = HashMap::new();
    let mut used_lenses = HashMap::new();
    for base_url in selectors {
        let name = unique_name(&mut used_selectors, host_of(&base_url));
        match list_lenses(&inner.http, &base_url).await {
            Ok(lens_names) => {
                for lens_name in lens_names {
                    let key = unique_name(&mut used_lenses, lens_name.clone());
                    maps.lenses.push(LensEntry {
                        key,
                        selector: name.clone(),
                        lens_name,
                    });
                }
                maps.selectors.push(ServiceEntry { name, base_url });
            }
            Err(err) => {
                tracing::warn!(error = %err, selector = %name, "skipping selector: listing failed");
            }
        }
    }

    tracing::info!(
        preprocessors = maps.preprocessors.len(),
        selectors = maps.selectors.len(),
        lenses = maps.lenses.len(),
        "registry refreshed"
    );
    inner.maps.store(Arc::new(maps));
    Ok(())
}

async fn list_lenses(http: &reqwest::Client, base_url: &str) -> Result<Vec<String>, RegistryError> {
    let url = format!("{}/lenses", base_url.trim_end_matches('/'));
    let response = http.get(&url).send().await.map_err(|e| RegistryError::Upstream {
        service: base_url.to_owned(),
        detail: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(RegistryError::Upstream {
            service: base_url.to_owned(),
            detail: format!("lens listing returned {}", response.status()),
        });
    }
    let body: Value = response.json().await.map_err(|e| RegistryError::Upstream {
        service: base_url.to_owned(),
        detail: format!("invalid lens listing: {e}"),
    })?;
    Ok(body
        .get("lenses")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(|name| name.strip_suffix(".js").unwrap_or(name).to_owned())
        .collect())
}

/// Host component of a URL, port stripped.
fn host_of(url: &str) -> String {
    if let Some(host) = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
    {
        return host;
    }
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split([':', '/'])
        .next()
        .unwrap_or(url)
        .to_owned()
}

/// Deduplicate names with `-2`, `-3`, … suffixes in insertion order.
fn unique_name(used: &mut HashMap<String, u32>, base: String) -> String {
    let count = used.entry(base.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base
    } else {
        format!("{base}-{count}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_scheme_and_port() {
        assert_eq!(host_of("http://annotator.svc:8080"), "annotator.svc");
        assert_eq!(host_of("https://example.com/path"), "example.com");
        assert_eq!(host_of("annotator:8080"), "annotator");
    }

    #[test]
    fn names_get_numeric_suffixes_in_insertion_order() {
        let mut used = HashMap::new();
        assert_eq!(unique_name(&mut used, "a".into()), "a");
        assert_eq!(unique_name(&mut used, "a".into()), "a-2");
        assert_eq!(unique_name(&mut used, "b".into()), "b");
        assert_eq!(unique_name(&mut used, "a".into()), "a-3");
    }
}
