//! Pipeline behaviour against mocked preprocessor services: longest-prefix
//! reuse, full-hit idempotence, soft step failures, and per-sequence
//! single-flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use focusman::{PipelineRun, PreprocessingPipeline, StepFailureCode};
use focusman::cache::{MemoryCache, PrefixCache};
use focusman::epi::{CacheKeys, CategoryCode, EpiDocument, PipelineStep};
use focusman::registry::{RegistryConfig, ServiceRegistry, StaticDiscovery};

/// Responds like a preprocessor: returns the posted document with this
/// service's marker appended to `_applied`.
struct MarkingPreprocessor {
    marker: &'static str,
    delay: Option<Duration>,
}

impl Respond for MarkingPreprocessor {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut doc: Value = serde_json::from_slice(&request.body).expect("json body");
        match doc.get_mut("_applied").and_then(Value::as_array_mut) {
            Some(applied) => applied.push(json!(self.marker)),
            None => {
                doc["_applied"] = json!([self.marker]);
            }
        }
        let mut template = ResponseTemplate::new(200).set_body_json(doc);
        if let Some(delay) = self.delay {
            template = template.set_delay(delay);
        }
        template
    }
}

async fn marking_server(marker: &'static str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/preprocess"))
        .respond_with(MarkingPreprocessor {
            marker,
            delay: None,
        })
        .mount(&server)
        .await;
    server
}

fn sample_doc() -> EpiDocument {
    EpiDocument::new(json!({
        "resourceType": "Bundle",
        "entry": [{ "resource": {
            "resourceType": "Composition",
            "category": [{ "coding": [{ "code": "R" }] }],
            "section": [{
                "title": "Package Leaflet",
                "section": [{
                    "title": "1. What it is",
                    "text": {
                        "status": "additional",
                        "div": "<div xmlns=\"http://www.w3.org/1999/xhtml\"><p>Take daily.</p></div>",
                    },
                }],
            }],
        }}],
    }))
}

/// Registry answering the preprocessing selector with the given mock URIs.
async fn registry_for(uris: Vec<String>) -> ServiceRegistry {
    let mut by_selector = HashMap::new();
    by_selector.insert("preproc=true".to_string(), uris);
    by_selector.insert("focusing=true".to_string(), Vec::new());
    let registry = ServiceRegistry::new(
        Arc::new(StaticDiscovery::new(by_selector)),
        reqwest::Client::new(),
        RegistryConfig {
            preprocessing_selector: "preproc=true".into(),
            focusing_selector: "focusing=true".into(),
            external_endpoints: Vec::new(),
        },
    );
    registry.refresh().await.expect("initial refresh");
    registry
}

fn pipeline_with(registry: ServiceRegistry) -> PreprocessingPipeline {
    let cache = Arc::new(MemoryCache::new(
        CacheKeys::default(),
        64,
        Duration::from_secs(300),
    ));
    PreprocessingPipeline::new(cache, registry)
}

fn steps_of(names: &[String]) -> Vec<PipelineStep> {
    names.iter().map(|name| PipelineStep::named(name.as_str())).collect()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

#[tokio::test]
async fn longest_cached_prefix_is_reused() {
    let (a, b, c) = (
        marking_server("A").await,
        marking_server("B").await,
        marking_server("C").await,
    );
    let registry = registry_for(vec![a.uri(), b.uri(), c.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);
    let doc = sample_doc();

    let first = pipeline.run(&doc, &steps_of(&names[..2])).await;
    assert!(first.failures.is_empty());
    assert_eq!(first.doc["_applied"], json!(["A", "B"]));
    assert_eq!(request_count(&a).await, 1);
    assert_eq!(request_count(&b).await, 1);

    // Extending the sequence only calls the missing suffix.
    let second = pipeline.run(&doc, &steps_of(&names)).await;
    assert!(second.failures.is_empty());
    assert_eq!(second.doc["_applied"], json!(["A", "B", "C"]));
    assert_eq!(request_count(&a).await, 1);
    assert_eq!(request_count(&b).await, 1);
    assert_eq!(request_count(&c).await, 1);
}

#[tokio::test]
async fn repeated_run_makes_no_outbound_calls() {
    let (a, b) = (marking_server("A").await, marking_server("B").await);
    let registry = registry_for(vec![a.uri(), b.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);
    let doc = sample_doc();

    let first = pipeline.run(&doc, &steps_of(&names)).await;
    let second = pipeline.run(&doc, &steps_of(&names)).await;

    assert_eq!(first.doc, second.doc);
    assert_eq!(request_count(&a).await, 1);
    assert_eq!(request_count(&b).await, 1);
}

#[tokio::test]
async fn failing_step_is_skipped_and_recorded() {
    let a = marking_server("A").await;
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/preprocess"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let registry = registry_for(vec![a.uri(), broken.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);

    let run = pipeline.run(&sample_doc(), &steps_of(&names)).await;
    assert_eq!(run.doc["_applied"], json!(["A"]));
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].step, names[1]);
    assert_eq!(run.failures[0].code, StepFailureCode::UpstreamUnavailable);
}

#[tokio::test]
async fn unknown_step_is_a_soft_failure_after_one_refresh() {
    let a = marking_server("A").await;
    let registry = registry_for(vec![a.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);

    let mut steps = steps_of(&names);
    steps.push(PipelineStep::named("no-such-service"));
    let run = pipeline.run(&sample_doc(), &steps).await;

    assert_eq!(run.doc["_applied"], json!(["A"]));
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].code, StepFailureCode::UnknownService);
}

#[tokio::test]
async fn empty_step_list_returns_the_document_unchanged() {
    let registry = registry_for(Vec::new()).await;
    let pipeline = pipeline_with(registry);
    let doc = sample_doc();

    let run = pipeline.run(&doc, &[]).await;
    assert!(run.failures.is_empty());
    assert_eq!(&run.doc, doc.as_value());
}

#[tokio::test]
async fn successful_steps_advance_category_to_preprocessed() {
    let a = marking_server("A").await;
    let registry = registry_for(vec![a.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);

    let run = pipeline.run(&sample_doc(), &steps_of(&names)).await;
    let doc = EpiDocument::new(run.doc);
    assert_eq!(doc.category_code(), Some(CategoryCode::Preprocessed));
}

#[tokio::test]
async fn concurrent_identical_runs_share_one_execution() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/preprocess"))
        .respond_with(MarkingPreprocessor {
            marker: "S",
            delay: Some(Duration::from_millis(100)),
        })
        .mount(&slow)
        .await;

    let registry = registry_for(vec![slow.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);
    let doc = sample_doc();
    let steps = steps_of(&names);

    let (one, two): (PipelineRun, PipelineRun) =
        tokio::join!(pipeline.run(&doc, &steps), pipeline.run(&doc, &steps));

    assert_eq!(one.doc, two.doc);
    assert_eq!(request_count(&slow).await, 1);
}

#[tokio::test]
async fn invalidation_forces_a_fresh_run() {
    let a = marking_server("A").await;
    let registry = registry_for(vec![a.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);
    let doc = sample_doc();
    let steps = steps_of(&names);

    pipeline.run(&doc, &steps).await;
    let removed = pipeline
        .invalidate_by_epi(&focusman::epi::fingerprint(&doc))
        .await;
    assert_eq!(removed, 1);

    pipeline.run(&doc, &steps).await;
    assert_eq!(request_count(&a).await, 2);
}

#[tokio::test]
async fn cache_stats_expose_partial_hits() {
    let (a, b) = (marking_server("A").await, marking_server("B").await);
    let registry = registry_for(vec![a.uri(), b.uri()]).await;
    let names = registry.preprocessor_names();
    let pipeline = pipeline_with(registry);
    let doc = sample_doc();

    pipeline.run(&doc, &steps_of(&names[..1])).await;
    pipeline.run(&doc, &steps_of(&names)).await;

    let stats = pipeline.cache().stats();
    assert_eq!(stats.partial_hits, 1);
    assert_eq!(stats.sets, 2);
}
