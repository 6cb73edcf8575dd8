//! MCP-backed tool session.

use crate::SessionError;
use crate::catalog::ToolDescriptor;
use crate::session::{ToolOutput, ToolSession};
use mcp::{CallToolResult, Session, Tool};
use serde_json::{Map, Value};

impl From<mcp::Error> for SessionError {
    fn from(err: mcp::Error) -> Self {
        match err {
            mcp::Error::Closed | mcp::Error::ServerExited => Self::Closed,
            mcp::Error::Timeout => Self::Timeout,
            mcp::Error::JsonRpc(e) => Self::Remote(e.to_string()),
            mcp::Error::ToolCallFailed(msg) => Self::ToolFault(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<Tool> for ToolDescriptor {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
        }
    }
}

impl From<CallToolResult> for ToolOutput {
    fn from(result: CallToolResult) -> Self {
        if result.is_text_only() {
            return Self::Text(result.text());
        }
        match serde_json::to_value(&result.content) {
            Ok(value) => Self::Structured(value),
            Err(e) => Self::Text(format!("unrenderable tool result: {e}")),
        }
    }
}

impl ToolSession for Session {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let tools = Session::list_tools(self).await?;
        Ok(tools.into_iter().map(ToolDescriptor::from).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, SessionError> {
        let result = Session::call_tool(self, name, arguments).await?;
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp::{JsonRpcError, ToolContent};
    use serde_json::json;

    #[test]
    fn error_mapping() {
        assert!(matches!(
            SessionError::from(mcp::Error::Closed),
            SessionError::Closed
        ));
        assert!(matches!(
            SessionError::from(mcp::Error::ServerExited),
            SessionError::Closed
        ));
        assert!(matches!(
            SessionError::from(mcp::Error::Timeout),
            SessionError::Timeout
        ));
        assert!(matches!(
            SessionError::from(mcp::Error::ToolCallFailed("bad".into())),
            SessionError::ToolFault(msg) if msg == "bad"
        ));
        let rpc = JsonRpcError {
            code: -32602,
            message: "Unknown tool: x".into(),
            data: None,
        };
        assert!(matches!(
            SessionError::from(mcp::Error::JsonRpc(rpc)),
            SessionError::Remote(msg) if msg == "[-32602] Unknown tool: x"
        ));
        assert!(matches!(
            SessionError::from(mcp::Error::InvalidResponse("x".into())),
            SessionError::Transport(_)
        ));
    }

    #[test]
    fn tool_without_description() {
        let tool: Tool = serde_json::from_value(json!({
            "name": "add",
            "inputSchema": {"type": "object", "properties": {"a": {"type": "integer"}}}
        }))
        .unwrap();
        let descriptor = ToolDescriptor::from(tool);
        assert_eq!(descriptor.name, "add");
        assert_eq!(descriptor.description, "");
        assert_eq!(descriptor.input_schema["properties"]["a"]["type"], "integer");
    }

    #[test]
    fn text_results_render_as_text() {
        let result = CallToolResult {
            content: vec![
                ToolContent::Text { text: "6".into() },
                ToolContent::Text {
                    text: "done".into(),
                },
            ],
            is_error: false,
        };
        assert_eq!(ToolOutput::from(result), ToolOutput::Text("6\ndone".into()));
    }

    #[test]
    fn mixed_results_render_as_json() {
        let result = CallToolResult {
            content: vec![
                ToolContent::Text {
                    text: "frame".into(),
                },
                ToolContent::Image {
                    data: "AAA".into(),
                    mime_type: "image/png".into(),
                },
            ],
            is_error: false,
        };
        let ToolOutput::Structured(value) = ToolOutput::from(result) else {
            panic!("expected structured output");
        };
        assert_eq!(value[1]["type"], "image");
        assert_eq!(value[1]["mimeType"], "image/png");
    }
}
