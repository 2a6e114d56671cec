//! Lens execution over ePI leaflets.
//!
//! A lens is a small user-authored script fetched from its selector at
//! request time. Its body runs inside an embedded [`rhai`] engine with no
//! filesystem, network, or process surface and hard per-execution budgets
//! (operations, call depth, value sizes, wall clock). The script defines
//!
//! ```rhai
//! fn enhance(epi, ips, pv, html) { /* returns new xhtml */ }
//! fn explanation(epi, ips, pv, html) { /* optional */ }
//! ```
//!
//! [`LensRuntime::apply`] drives the whole per-document flow: concatenate
//! the leaflet narrative, run `enhance`, re-segment the result into
//! sections, stamp category and provenance. Every failure is a typed,
//! per-lens [`LensError`] — one broken lens never aborts the others.

pub mod error;
pub mod explain;
pub mod runtime;
pub mod segment;
pub mod sink;

pub use error::LensError;
pub use explain::default_explanation;
pub use runtime::{AppliedLens, CompiledLens, LensLimits, LensRuntime, LensScript};
pub use segment::{collect_leaflet_html, resegment, split_enhanced_html, XHTML_NS};
pub use sink::{LogLevel, LogRecord, LogSink, NullSink, TracingSink};
