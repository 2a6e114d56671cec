use thiserror::Error;

/// Per-lens failures. None of these aborts the other lenses of a request;
/// the document is only advanced when a lens completes.
#[derive(Debug, Clone, Error)]
pub enum LensError {
    #[error("leaflet has no narrative content")]
    EmptyLeaflet,

    #[error("lens `{0}` has an empty script body")]
    EmptyScript(String),

    #[error("lens `{0}` body could not be decoded: {1}")]
    DecodeFailure(String, String),

    #[error("lens `{0}` failed to compile: {1}")]
    CompileFailure(String, String),

    #[error("lens `{0}` raised at runtime: {1}")]
    RuntimeFailure(String, String),

    #[error("lens `{0}` produced no recognisable xhtml sections")]
    SegmentationFailure(String),
}

impl LensError {
    /// Stable kind tag surfaced in warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            LensError::EmptyLeaflet => "EmptyLeaflet",
            LensError::EmptyScript(_) => "EmptyScript",
            LensError::DecodeFailure(..) => "DecodeFailure",
            LensError::CompileFailure(..) => "CompileFailure",
            LensError::RuntimeFailure(..) => "RuntimeFailure",
            LensError::SegmentationFailure(_) => "SegmentationFailure",
        }
    }

    pub fn lens_id(&self) -> Option<&str> {
        match self {
            LensError::EmptyLeaflet => None,
            LensError::EmptyScript(id)
            | LensError::DecodeFailure(id, _)
            | LensError::CompileFailure(id, _)
            | LensError::RuntimeFailure(id, _)
            | LensError::SegmentationFailure(id) => Some(id),
        }
    }
}
