//! Tool session contract consumed by the orchestration loop.

use crate::SessionError;
use crate::catalog::ToolDescriptor;
use serde_json::{Map, Value};
use std::future::Future;

/// Result of a tool invocation as returned by the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
}

impl ToolOutput {
    /// Textual rendering fed back to the model.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// A live connection to a tool-hosting endpoint.
///
/// The loop only borrows a session; opening and closing it belong to
/// whoever created it.
pub trait ToolSession: Send + Sync {
    /// Fetch the endpoint's current tool descriptors.
    fn list_tools(&self) -> impl Future<Output = Result<Vec<ToolDescriptor>, SessionError>> + Send;

    /// Invoke `name` with `arguments`.
    fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = Result<ToolOutput, SessionError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_output() {
        assert_eq!(ToolOutput::Text("60".into()).render(), "60");
        assert_eq!(
            ToolOutput::Structured(json!({"value": 60})).render(),
            r#"{"value":60}"#
        );
    }
}
