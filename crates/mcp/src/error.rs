//! MCP session errors.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The server process could not be started.
    #[error("could not start tool server: {0}")]
    Spawn(std::io::Error),

    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The session was closed locally.
    #[error("session closed")]
    Closed,

    /// The server closed its output stream.
    #[error("tool server exited")]
    ServerExited,

    #[error("no reply from tool server within the timeout")]
    Timeout,

    #[error("could not encode request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed reply: {0}")]
    InvalidResponse(String),

    /// The server answered with a JSON-RPC error object.
    #[error("server rejected request: {0}")]
    JsonRpc(#[from] JsonRpcError),

    /// The tool ran but flagged its result with `isError`.
    #[error("tool reported failure: {0}")]
    ToolCallFailed(String),

    #[error("reply line of {size} bytes exceeds the {max} byte limit")]
    OutputTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
