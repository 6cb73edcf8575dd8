//! The conversation/tool turn loop.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::Result;
use crate::arguments::decode_arguments;
use crate::catalog::ToolCatalog;
use crate::conversation::{ConversationState, Message};
use crate::invoker::ToolInvoker;
use crate::model::{Backend, ModelRequest, ToolChoice, Usage};
use crate::session::ToolSession;

/// Default cap on completion calls per query.
pub const DEFAULT_MAX_TURNS: usize = 25;

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Completion calls allowed per query; `None` removes the cap.
    pub max_turns: Option<usize>,
    /// Re-list the session's tools before every completion call.
    pub refresh_catalog: bool,
    /// Per-call bound on tool invocations.
    pub tool_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: Some(DEFAULT_MAX_TURNS),
            refresh_catalog: false,
            tool_timeout: None,
        }
    }
}

/// What a finished query produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Assistant text and tool trace lines, joined by newlines.
    pub output: String,
    /// Completion calls made.
    pub turns: usize,
    /// Whether the turn cap ended the loop.
    pub truncated: bool,
    /// Token usage summed over every completion call.
    pub usage: Usage,
}

/// Drives a query through repeated completion calls and tool invocations
/// until the model stops asking for tools.
///
/// The session is only borrowed; whoever opened it closes it.
pub struct Orchestrator<B> {
    backend: B,
    config: OrchestratorConfig,
}

impl<B: Backend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, OrchestratorConfig::default())
    }

    pub fn with_config(backend: B, config: OrchestratorConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer `query` starting from an empty conversation.
    pub async fn run<S: ToolSession>(
        &self,
        query: &str,
        catalog: &ToolCatalog,
        session: &S,
    ) -> Result<RunOutcome> {
        let mut state = ConversationState::new(query);
        self.drive(&mut state, catalog, session).await
    }

    /// Run the loop over a caller-owned conversation.
    ///
    /// `state` keeps everything appended before a failure, so a failed tool
    /// call leaves its request in the history without a matching result.
    pub async fn drive<S: ToolSession>(
        &self,
        state: &mut ConversationState,
        catalog: &ToolCatalog,
        session: &S,
    ) -> Result<RunOutcome> {
        let invoker = ToolInvoker::new(session).with_timeout(self.config.tool_timeout);
        let max_turns = self.config.max_turns.map(|max| max.max(1));

        let mut output = Vec::new();
        let mut usage = Usage::default();
        let mut turns = 0;

        loop {
            let refreshed;
            let catalog = if self.config.refresh_catalog {
                refreshed = ToolCatalog::refresh(session).await?;
                &refreshed
            } else {
                catalog
            };

            let tools = catalog.descriptors();
            let tool_choice = if tools.is_empty() {
                ToolChoice::None
            } else {
                ToolChoice::Auto
            };

            turns += 1;
            debug!(turn = turns, messages = state.len(), tools = tools.len(), "calling model");
            let response = self
                .backend
                .call(ModelRequest {
                    messages: state.messages(),
                    tools,
                    tool_choice,
                })
                .await?;
            usage += response.usage;

            let text = response.content.unwrap_or_default();
            if !text.is_empty() {
                output.push(text.clone());
            }
            let calls = response.tool_calls;
            state.push(Message::assistant(text, calls.clone()));

            if calls.is_empty() {
                info!(turns, "model returned a final answer");
                return Ok(RunOutcome {
                    output: output.join("\n"),
                    turns,
                    truncated: false,
                    usage,
                });
            }

            if max_turns.is_some_and(|max| turns >= max) {
                warn!(turns, pending = calls.len(), "turn limit reached, stopping");
                output.push(format!("[stopped after {turns} turns without a final answer]"));
                return Ok(RunOutcome {
                    output: output.join("\n"),
                    turns,
                    truncated: true,
                    usage,
                });
            }

            for call in calls {
                let arguments = decode_arguments(&call.arguments);
                let trace = format!(
                    "[Calling tool {} with args {}]",
                    call.name,
                    Value::Object(arguments.clone())
                );
                let result = invoker.invoke(&call.name, arguments).await?;
                state.push(Message::tool_result(call.id, call.name, result));
                output.push(trace);
            }
        }
    }
}
