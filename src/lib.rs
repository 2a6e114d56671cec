//! Umbrella crate for the Focusing Manager.
//!
//! The Focusing Manager transforms an ePI document in two phases: an
//! ordered chain of remote preprocessor services, then a set of sandboxed
//! lens scripts that adapt the leaflet to a patient. This crate ties the
//! layer crates together:
//!
//! * [`epi`] — document views, fingerprints, cache keys;
//! * [`cache`] — prefix cache back-ends and composites;
//! * [`registry`] — service discovery and the single-flight registry;
//! * [`pipeline`] — the preprocessing pipeline itself;
//! * [`config`] — environment configuration shared by the server binary.
//!
//! The HTTP surface lives in the `focusman-server` crate.

pub mod config;
pub mod pipeline;

pub use cache;
pub use epi;
pub use registry;

pub use crate::config::FocusConfig;
pub use crate::pipeline::{PipelineRun, PreprocessingPipeline, StepFailure, StepFailureCode};
