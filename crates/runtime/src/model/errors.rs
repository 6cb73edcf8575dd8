use thiserror::Error;

/// Errors from completion service calls.
///
/// Marked `#[non_exhaustive]` so providers can grow new failure kinds.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The request never got a reply (DNS, TLS, connection reset).
    #[error("request failed: {0}")]
    Network(String),

    /// The service answered with a non-success status; carries status and body.
    #[error("service returned {0}")]
    Api(String),

    /// The reply body did not match the expected shape.
    #[error("unexpected reply: {0}")]
    InvalidResponse(String),
}
