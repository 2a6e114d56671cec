//! The lens execution environment.
//!
//! Each execution gets its own engine and scope: a lens cannot observe or
//! mutate another lens's state, and the only values in reach are the four
//! bound arguments `(epi, ips, pv, html)`. Budgets (operation count, call
//! depth, value sizes, wall clock) terminate runaway scripts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rhai::serde::to_dynamic;
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;

use epi::{CategoryCode, EpiDocument, IpsDocument};

use crate::error::LensError;
use crate::explain::default_explanation;
use crate::segment::{collect_leaflet_html, resegment, split_enhanced_html};
use crate::sink::{LogLevel, LogRecord, LogSink, NullSink};

/// A lens script ready to compile: decoded body plus selector metadata.
#[derive(Debug, Clone)]
pub struct LensScript {
    pub name: String,
    pub body: String,
    pub metadata: Value,
}

impl LensScript {
    /// Decode a base64 script body as fetched from a selector.
    pub fn from_base64(
        name: impl Into<String>,
        data: Option<&str>,
        metadata: Value,
    ) -> Result<Self, LensError> {
        let name = name.into();
        let data = data.ok_or_else(|| LensError::EmptyScript(name.clone()))?;
        let bytes = BASE64
            .decode(data.trim())
            .map_err(|e| LensError::DecodeFailure(name.clone(), e.to_string()))?;
        let body = String::from_utf8(bytes)
            .map_err(|e| LensError::DecodeFailure(name.clone(), e.to_string()))?;
        if body.trim().is_empty() {
            return Err(LensError::EmptyScript(name));
        }
        Ok(Self {
            name,
            body,
            metadata,
        })
    }

    pub fn from_source(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            metadata: Value::Null,
        }
    }
}

/// Execution budgets for one lens run.
#[derive(Debug, Clone)]
pub struct LensLimits {
    pub max_operations: u64,
    pub max_call_depth: usize,
    pub max_string_size: usize,
    pub max_collection_size: usize,
    pub deadline: Duration,
}

impl Default for LensLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_depth: 64,
            max_string_size: 10 * 1024 * 1024,
            max_collection_size: 100_000,
            deadline: Duration::from_secs(10),
        }
    }
}

/// A compiled lens, valid for one section sweep.
pub struct CompiledLens {
    name: String,
    ast: AST,
    has_explanation: bool,
}

impl std::fmt::Debug for CompiledLens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledLens")
            .field("name", &self.name)
            .field("has_explanation", &self.has_explanation)
            .finish()
    }
}

/// Result of one successful application.
#[derive(Debug, Clone)]
pub struct AppliedLens {
    pub lens: String,
    pub explanation: String,
}

pub struct LensRuntime {
    limits: LensLimits,
    /// Host-side (LEE) events.
    lee_sink: Arc<dyn LogSink>,
    /// Script `print`/`debug` output.
    lens_sink: Arc<dyn LogSink>,
}

impl LensRuntime {
    pub fn new(
        limits: LensLimits,
        lee_sink: Arc<dyn LogSink>,
        lens_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            limits,
            lee_sink,
            lens_sink,
        }
    }

    /// Runtime with default budgets and no logging; used by tests.
    pub fn silent() -> Self {
        Self::new(
            LensLimits::default(),
            Arc::new(NullSink),
            Arc::new(NullSink),
        )
    }

    fn engine(&self, lens_name: &str) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_depth);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_collection_size);
        engine.set_max_map_size(self.limits.max_collection_size);

        let deadline = Instant::now() + self.limits.deadline;
        engine.on_progress(move |_| {
            if Instant::now() > deadline {
                Some(Dynamic::from("lens execution deadline exceeded".to_string()))
            } else {
                None
            }
        });

        let print_sink = Arc::clone(&self.lens_sink);
        let print_name = lens_name.to_owned();
        engine.on_print(move |text| {
            print_sink.log(&LogRecord {
                file: "lens-script",
                task: "print",
                level: LogLevel::Info,
                lens_id: Some(&print_name),
                request_id: None,
                message: text,
            });
        });
        let debug_sink = Arc::clone(&self.lens_sink);
        let debug_name = lens_name.to_owned();
        engine.on_debug(move |text, _source, _pos| {
            debug_sink.log(&LogRecord {
                file: "lens-script",
                task: "debug",
                level: LogLevel::Debug,
                lens_id: Some(&debug_name),
                request_id: None,
                message: text,
            });
        });
        engine
    }

    /// Compile a script body into a callable lens.
    pub fn compile(&self, script: &LensScript) -> Result<CompiledLens, LensError> {
        if script.body.trim().is_empty() {
            return Err(LensError::EmptyScript(script.name.clone()));
        }
        let engine = self.engine(&script.name);
        let ast = engine
            .compile(&script.body)
            .map_err(|e| LensError::CompileFailure(script.name.clone(), e.to_string()))?;
        let mut has_enhance = false;
        let mut has_explanation = false;
        for function in ast.iter_functions() {
            match function.name {
                "enhance" => has_enhance = true,
                "explanation" => has_explanation = true,
                _ => {}
            }
        }
        if !has_enhance {
            return Err(LensError::CompileFailure(
                script.name.clone(),
                "script defines no `enhance` function".into(),
            ));
        }
        Ok(CompiledLens {
            name: script.name.clone(),
            ast,
            has_explanation,
        })
    }

    /// Run `enhance` (and `explanation` when defined) over one xhtml string.
    pub fn execute(
        &self,
        compiled: &CompiledLens,
        epi_doc: &Value,
        ips: &Value,
        pv: Option<&Value>,
        html: &str,
    ) -> Result<(String, Option<String>), LensError> {
        let name = compiled.name.clone();
        let runtime_err =
            |detail: String| LensError::RuntimeFailure(name.clone(), detail);

        let epi_dyn = to_dynamic(epi_doc).map_err(|e| runtime_err(e.to_string()))?;
        let ips_dyn = to_dynamic(ips).map_err(|e| runtime_err(e.to_string()))?;
        let pv_dyn = match pv {
            Some(pv) => to_dynamic(pv).map_err(|e| runtime_err(e.to_string()))?,
            None => Dynamic::UNIT,
        };

        let engine = self.engine(&compiled.name);
        let mut scope = Scope::new();
        let enhanced: Dynamic = engine
            .call_fn(
                &mut scope,
                &compiled.ast,
                "enhance",
                (
                    epi_dyn.clone(),
                    ips_dyn.clone(),
                    pv_dyn.clone(),
                    html.to_owned(),
                ),
            )
            .map_err(|e| runtime_err(e.to_string()))?;
        let enhanced = enhanced
            .into_string()
            .map_err(|actual| runtime_err(format!("enhance returned `{actual}`, expected a string")))?;

        let explanation = if compiled.has_explanation {
            let mut scope = Scope::new();
            let value: Dynamic = engine
                .call_fn(
                    &mut scope,
                    &compiled.ast,
                    "explanation",
                    (epi_dyn, ips_dyn, pv_dyn, html.to_owned()),
                )
                .map_err(|e| runtime_err(e.to_string()))?;
            value.into_string().ok().filter(|s| !s.trim().is_empty())
        } else {
            None
        };

        Ok((enhanced, explanation))
    }

    /// Apply one lens to the document in place.
    ///
    /// The document is only mutated after the script has produced a
    /// well-segmented result; any failure leaves it untouched.
    pub fn apply(
        &self,
        doc: &mut EpiDocument,
        script: &LensScript,
        ips: &IpsDocument,
        pv: Option<&Value>,
        request_id: Option<&str>,
    ) -> Result<AppliedLens, LensError> {
        let leaflet = doc.leaflet_sections().map_err(|_| LensError::EmptyLeaflet)?;
        let html = collect_leaflet_html(&leaflet.sections);
        if html.trim().is_empty() {
            return Err(LensError::EmptyLeaflet);
        }

        let compiled = self.compile(script)?;

        self.lee_sink.log(&LogRecord {
            file: "lens-runtime",
            task: "apply",
            level: LogLevel::Debug,
            lens_id: Some(&script.name),
            request_id,
            message: "executing lens",
        });

        let (enhanced, explanation) =
            self.execute(&compiled, doc.as_value(), ips.as_value(), pv, &html)?;

        let parts = split_enhanced_html(&enhanced);
        if parts.is_empty() {
            return Err(LensError::SegmentationFailure(script.name.clone()));
        }
        let sections = resegment(&leaflet.sections, parts);

        let explanation = explanation.unwrap_or_else(|| {
            default_explanation(&script.name, doc.language().unwrap_or("en"), ips)
        });

        let epi_err =
            |e: epi::EpiError| LensError::RuntimeFailure(script.name.clone(), e.to_string());
        doc.write_leaflet_sections(leaflet.index, sections)
            .map_err(epi_err)?;
        doc.advance_category(CategoryCode::Enhanced).map_err(epi_err)?;
        doc.append_lens_provenance(&script.name, &explanation)
            .map_err(epi_err)?;

        self.lee_sink.log(&LogRecord {
            file: "lens-runtime",
            task: "apply",
            level: LogLevel::Info,
            lens_id: Some(&script.name),
            request_id,
            message: "lens applied",
        });

        Ok(AppliedLens {
            lens: script.name.clone(),
            explanation,
        })
    }

    /// [`apply`](Self::apply) on a blocking thread, for use inside request
    /// handlers. Returns the (possibly updated) document alongside the
    /// outcome.
    pub async fn apply_async(
        self: Arc<Self>,
        doc: EpiDocument,
        script: LensScript,
        ips: IpsDocument,
        pv: Option<Value>,
        request_id: Option<String>,
    ) -> (EpiDocument, Result<AppliedLens, LensError>) {
        let fallback = doc.clone();
        let lens_name = script.name.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut doc = doc;
            let result = self.apply(&mut doc, &script, &ips, pv.as_ref(), request_id.as_deref());
            (doc, result)
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(join_err) => (
                fallback,
                Err(LensError::RuntimeFailure(
                    lens_name,
                    format!("lens task aborted: {join_err}"),
                )),
            ),
        }
    }
}
