//! The preprocessing pipeline.
//!
//! Given an ordered list of steps and a document, reuse the longest cached
//! prefix, call the remaining steps remotely in order, and cache every
//! newly produced intermediate so future pipelines sharing any prefix can
//! short-circuit. A failing step is recorded and skipped; the pipeline
//! carries on with the unchanged document.
//!
//! Within one process, concurrent runs over the same
//! `(fingerprint, step sequence)` share a single in-flight execution — the
//! prefix cache absorbs duplication across differing sequences.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;

use cache::SharedCache;
use epi::{fingerprint, signature_prefix, CategoryCode, EpiDocument, PipelineStep};
use registry::{RegistryError, ServiceRegistry};

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepFailureCode {
    UnknownService,
    UpstreamUnavailable,
    DiscoveryFailure,
}

/// One skipped step. `step` is the requested step name; `message` carries
/// the underlying cause for logs and warning details.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub code: StepFailureCode,
    pub message: String,
}

impl StepFailure {
    fn from_registry(step: &PipelineStep, err: RegistryError) -> Self {
        let code = match &err {
            RegistryError::UnknownService(_) | RegistryError::UnknownLens(_) => {
                StepFailureCode::UnknownService
            }
            RegistryError::Discovery(_) => StepFailureCode::DiscoveryFailure,
            RegistryError::Upstream { .. } => StepFailureCode::UpstreamUnavailable,
        };
        Self {
            step: step.name.clone(),
            code,
            message: err.to_string(),
        }
    }
}

/// Outcome of one pipeline run: the final document plus per-step failures.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub doc: Value,
    pub failures: Vec<StepFailure>,
}

type SharedRun = Shared<BoxFuture<'static, PipelineRun>>;

struct PipelineInner {
    cache: SharedCache,
    registry: ServiceRegistry,
    inflight: DashMap<String, SharedRun>,
}

#[derive(Clone)]
pub struct PreprocessingPipeline {
    inner: Arc<PipelineInner>,
}

impl PreprocessingPipeline {
    pub fn new(cache: SharedCache, registry: ServiceRegistry) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                cache,
                registry,
                inflight: DashMap::new(),
            }),
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.inner.cache
    }

    /// Run the pipeline, deduplicating concurrent identical runs.
    pub async fn run(&self, doc: &EpiDocument, steps: &[PipelineStep]) -> PipelineRun {
        if steps.is_empty() {
            return PipelineRun {
                doc: doc.as_value().clone(),
                failures: Vec::new(),
            };
        }

        let fp = fingerprint(doc);
        let flight_key = format!("{fp}:{}", signature_prefix(steps));
        let shared = match self.inner.inflight.entry(flight_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let this = self.clone();
                let doc = doc.clone();
                let steps = steps.to_vec();
                let shared = async move { this.run_once(&fp, &doc, &steps).await }
                    .boxed()
                    .shared();
                slot.insert(shared.clone());
                shared
            }
        };

        let run = shared.await;
        self.inner.inflight.remove(&flight_key);
        run
    }

    async fn run_once(
        &self,
        fp: &str,
        doc: &EpiDocument,
        steps: &[PipelineStep],
    ) -> PipelineRun {
        let mut failures = Vec::new();

        let (mut current, matched) = match self.inner.cache.get(fp, steps).await {
            Some(hit) if hit.matched == steps.len() => {
                tracing::debug!(fingerprint = fp, steps = steps.len(), "full cache hit");
                return PipelineRun {
                    doc: hit.value,
                    failures,
                };
            }
            Some(hit) => {
                tracing::debug!(
                    fingerprint = fp,
                    matched = hit.matched,
                    requested = steps.len(),
                    "partial cache hit"
                );
                (EpiDocument::new(hit.value), hit.matched)
            }
            None => (doc.clone(), 0),
        };

        // Signature prefix of the steps actually applied so far; failed
        // steps do not extend it, so intermediates are cached under the
        // sequence that really produced them.
        let mut applied: Vec<PipelineStep> = steps[..matched].to_vec();

        for step in &steps[matched..] {
            match self
                .inner
                .registry
                .call_preprocessor(&step.name, current.as_value())
                .await
            {
                Ok(next) => {
                    let mut next = EpiDocument::new(next);
                    if let Err(err) = next.advance_category(CategoryCode::Preprocessed) {
                        tracing::warn!(step = %step.name, error = %err, "category not advanced");
                    }
                    applied.push(step.clone());
                    self.inner
                        .cache
                        .set(fp, &applied, next.as_value(), None)
                        .await;
                    current = next;
                }
                Err(err) => {
                    tracing::warn!(step = %step.name, error = %err, "preprocessor step failed");
                    failures.push(StepFailure::from_registry(step, err));
                }
            }
        }

        PipelineRun {
            doc: current.into_value(),
            failures,
        }
    }

    /// Drop every cached intermediate of the given document fingerprint.
    /// Exposed for out-of-band overwrites; the pipeline never calls it.
    pub async fn invalidate_by_epi(&self, fp: &str) -> u64 {
        self.inner.cache.invalidate_by_epi(fp).await
    }
}
