use thiserror::Error;

/// Errors raised by the document views.
///
/// Both variants are recoverable: callers may log them and return the input
/// document unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EpiError {
    #[error("document has no Composition resource")]
    MissingComposition,

    #[error("malformed section at index {0}")]
    MalformedSection(usize),
}
