//! Document views and fingerprinting for ePI bundles.
//!
//! An ePI (electronic Product Information) document arrives as arbitrary
//! JSON: a FHIR `Bundle` whose entries carry a single `Composition` with a
//! tree of leaflet sections. This crate wraps that JSON in narrow typed
//! views ([`EpiDocument`], [`IpsDocument`]) that expose exactly the
//! operations the focusing pipeline needs while preserving every unknown
//! key on write-back.
//!
//! It also owns the deterministic identity of a document for caching:
//! [`fingerprint`] hashes the canonicalised section tree, and [`CacheKeys`]
//! composes `{schemaVersion}:{fingerprint}:{stepPrefix}` cache keys from
//! ordered [`PipelineStep`] sequences.

pub mod document;
pub mod error;
pub mod fingerprint;
pub mod ips;
pub mod step;

pub use document::{CategoryCode, EpiDocument, Leaflet, LENSES_APPLIED_EXTENSION, SECTION_CODE_SYSTEM};
pub use error::EpiError;
pub use fingerprint::{canonical_json, fingerprint, CacheKeys, DEFAULT_SCHEMA_VERSION};
pub use ips::{AllergyEntry, IpsDocument};
pub use step::{signature_prefix, PipelineStep};
