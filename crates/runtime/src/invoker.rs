//! Single tool-call execution.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::session::ToolSession;
use crate::{InvocationError, SessionError};

/// Executes tool calls against a borrowed session.
pub struct ToolInvoker<'a, S> {
    session: &'a S,
    timeout: Option<Duration>,
}

impl<'a, S: ToolSession> ToolInvoker<'a, S> {
    pub fn new(session: &'a S) -> Self {
        Self {
            session,
            timeout: None,
        }
    }

    /// Bound each call by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `name` with `arguments` and return the rendered result.
    ///
    /// No retries: the first failure is returned.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<String, InvocationError> {
        info!(tool = name, "invoking tool");

        let call = self.session.call_tool(name, arguments);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(SessionError::Timeout)),
            None => call.await,
        };

        let output = result.map_err(|source| InvocationError {
            tool: name.to_string(),
            source,
        })?;

        let text = output.render();
        debug!(tool = name, bytes = text.len(), "tool returned");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolDescriptor;
    use crate::session::ToolOutput;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call it receives and answers according to the tool name.
    #[derive(Default)]
    struct RecordingSession {
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl ToolSession for RecordingSession {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> Result<ToolOutput, SessionError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            match name {
                "echo" => Ok(ToolOutput::Structured(Value::Object(arguments))),
                "text" => Ok(ToolOutput::Text("plain".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ToolOutput::Text("late".into()))
                }
                "fault" => Err(SessionError::ToolFault("division by zero".into())),
                other => Err(SessionError::Remote(format!("Unknown tool: {other}"))),
            }
        }
    }

    #[tokio::test]
    async fn name_and_arguments_reach_session_unchanged() {
        let session = RecordingSession::default();
        let args = json!({"a": 54, "b": [1, 2]}).as_object().unwrap().clone();

        let text = ToolInvoker::new(&session)
            .invoke("echo", args.clone())
            .await
            .unwrap();

        assert_eq!(text, r#"{"a":54,"b":[1,2]}"#);
        let calls = session.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [("echo".to_string(), args)]);
    }

    #[tokio::test]
    async fn text_output_is_returned_verbatim() {
        let session = RecordingSession::default();
        let text = ToolInvoker::new(&session)
            .invoke("text", Map::new())
            .await
            .unwrap();
        assert_eq!(text, "plain");
    }

    #[tokio::test]
    async fn fault_carries_tool_name() {
        let session = RecordingSession::default();
        let err = ToolInvoker::new(&session)
            .invoke("fault", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.tool, "fault");
        assert!(matches!(err.source, SessionError::ToolFault(_)));
        assert_eq!(
            err.to_string(),
            "tool fault failed: tool reported an error: division by zero"
        );
    }

    #[tokio::test]
    async fn unknown_tool_fails() {
        let session = RecordingSession::default();
        let err = ToolInvoker::new(&session)
            .invoke("missing", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err.source, SessionError::Remote(_)));
    }

    #[tokio::test]
    async fn timeout_becomes_invocation_error() {
        let session = RecordingSession::default();
        let err = ToolInvoker::new(&session)
            .with_timeout(Some(Duration::from_millis(50)))
            .invoke("slow", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err.source, SessionError::Timeout));
    }
}
