use crate::model::ModelError;
use thiserror::Error;

/// Failure talking to the tool session itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,

    #[error("session request timed out")]
    Timeout,

    /// The endpoint rejected the request (unknown tool, bad params).
    #[error("remote error: {0}")]
    Remote(String),

    /// The tool ran and reported a fault.
    #[error("tool reported an error: {0}")]
    ToolFault(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// A single tool call failed.
#[derive(Debug, Error)]
#[error("tool {tool} failed: {source}")]
pub struct InvocationError {
    pub tool: String,
    #[source]
    pub source: SessionError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("completion service: {0}")]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, Error>;
