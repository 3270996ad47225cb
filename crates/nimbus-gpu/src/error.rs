use thiserror::Error;

pub type Result<T> = std::result::Result<T, GfxError>;

/// Error taxonomy shared by the device front end and every backend.
///
/// Synchronous errors are raised at the offending call and never retried.
/// `Compilation` is only ever surfaced through a deferred result's rejection
/// path; creation entry points report descriptor problems as `Validation`
/// before any backend work happens.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GfxError {
    /// Malformed or out-of-range descriptor/argument.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested pixel/vertex format has no mapping on the active backend.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(&'static str),

    /// The requested feature is not available on the active backend.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// Operation invoked in an invalid state (open pass, finished encoder, ...).
    #[error("invalid state: {0}")]
    State(&'static str),

    /// Shader/pipeline compilation failed on the backend.
    #[error("pipeline compilation failed: {0}")]
    Compilation(String),

    /// Backend-reported failure that does not fit the categories above.
    #[error("backend error: {0}")]
    Backend(String),
}
