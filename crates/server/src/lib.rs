//! Focusing Manager HTTP server.
//!
//! Exposes the focus and preprocessing endpoints over axum, coordinates
//! the service registry, the preprocessing pipeline, and the lens runtime,
//! and turns per-stage soft failures into the `GH-Focusing-Warnings`
//! response header instead of failing whole requests.

pub mod error;
pub mod fhir;
pub mod middleware;
pub mod negotiate;
pub mod render;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
