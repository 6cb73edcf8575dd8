//! Toolrelay runtime: the conversation/tool orchestration loop.
//!
//! This crate turns a single user query into a bounded sequence of
//! completion calls and tool invocations against a dynamically discovered
//! tool catalog.
//!
//! # Overview
//!
//! - **ToolSession**: the contract a tool-hosting endpoint fulfils
//!   (`list_tools`, `call_tool`). Implemented for [`mcp::Session`].
//! - **ToolCatalog**: the tools a session currently advertises.
//! - **Backend**: a completion service (OpenAI, Azure OpenAI, Anthropic).
//! - **Orchestrator**: the turn loop tying them together.
//!
//! # Example
//!
//! ```ignore
//! use mcp::{ServerConfig, Session};
//! use runtime::{OpenAiAuth, OpenAiBackend, Orchestrator, ToolCatalog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::spawn(ServerConfig::new("math", "math-server")).await?;
//! let catalog = ToolCatalog::refresh(&session).await?;
//!
//! let backend = OpenAiBackend::builder(OpenAiAuth::ApiKey("sk-...".into()), "gpt-4o").build();
//! let orchestrator = Orchestrator::new(backend);
//!
//! let outcome = orchestrator.run("What is 54 + 2 * 3?", &catalog, &session).await;
//! let _ = session.close().await;
//! println!("{}", outcome?.output);
//! # Ok(())
//! # }
//! ```

mod arguments;
mod catalog;
mod conversation;
mod error;
mod invoker;
mod mcp_session;
pub mod model;
mod orchestrator;
pub mod providers;
mod session;

pub use arguments::decode_arguments;
pub use catalog::{ToolCatalog, ToolDescriptor};
pub use conversation::{ConversationState, Message, ToolCallRequest};
pub use error::{Error, InvocationError, Result, SessionError};
pub use invoker::ToolInvoker;
pub use model::{Backend, FinishReason, ModelError, ModelRequest, ModelResponse, ToolChoice, Usage};
pub use orchestrator::{DEFAULT_MAX_TURNS, Orchestrator, OrchestratorConfig, RunOutcome};
pub use providers::{
    AnthropicBackend, AnthropicBackendBuilder, OpenAiAuth, OpenAiBackend, OpenAiBackendBuilder,
    Provider,
};
pub use session::{ToolOutput, ToolSession};
