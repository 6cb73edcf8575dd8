//! MCP (Model Context Protocol) client library.
//!
//! This crate provides a client session for MCP tool servers speaking
//! line-delimited JSON-RPC, either over a spawned process's stdio or over any
//! async byte stream.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{ServerConfig, Session};
//!
//! # async fn example() -> mcp::Result<()> {
//! let mut config = ServerConfig::new("math", "python");
//! config.args = vec!["servers/math_server.py".to_string()];
//!
//! let session = Session::spawn(config).await?;
//!
//! for tool in session.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut args = serde_json::Map::new();
//! args.insert("a".into(), 2.into());
//! args.insert("b".into(), 3.into());
//! let result = session.call_tool("add", args).await?;
//! println!("{}", result.text());
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod session;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    PROTOCOL_VERSION, RequestId, ServerCapabilities, ServerInfo, Tool, ToolContent,
};
pub use session::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, ServerConfig, Session};
