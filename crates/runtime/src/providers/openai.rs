//! OpenAI-compatible chat completions backend (OpenAI and Azure OpenAI).

use crate::catalog::ToolDescriptor;
use crate::conversation::{Message, ToolCallRequest};
use crate::model::{
    Backend, FinishReason, ModelError, ModelRequest, ModelResponse, ToolChoice, Usage,
};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Authentication and addressing mode.
#[derive(Debug, Clone)]
pub enum OpenAiAuth {
    /// Bearer token against the OpenAI API (or a compatible base URL).
    ApiKey(String),
    /// Azure OpenAI: `api-key` header, deployment-scoped URL.
    Azure {
        api_key: String,
        endpoint: String,
        api_version: String,
    },
}

impl std::fmt::Display for OpenAiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "api_key"),
            Self::Azure { .. } => write!(f, "azure"),
        }
    }
}

impl OpenAiAuth {
    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => req.bearer_auth(key),
            Self::Azure { api_key, .. } => req.header("api-key", api_key),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ApiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ApiToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseToolCall {
    id: String,
    function: ApiResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ApiResponseFunction {
    name: String,
    /// Usually a JSON string; some compatible servers send an object.
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an OpenAI backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    auth: OpenAiAuth,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    base_url: String,
}

impl OpenAiBackendBuilder {
    pub fn new(auth: OpenAiAuth, model: impl Into<String>) -> Self {
        Self {
            auth,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Override the API base URL. Ignored for Azure, which carries its own
    /// endpoint.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> OpenAiBackend {
        OpenAiBackend {
            client: reqwest::Client::new(),
            auth: self.auth,
            model: self.model,
            max_tokens: self.max_tokens,
            system: self.system,
            base_url: self.base_url,
        }
    }
}

/// OpenAI chat completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    auth: OpenAiAuth,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    base_url: String,
}

impl OpenAiBackend {
    pub fn builder(auth: OpenAiAuth, model: impl Into<String>) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(auth, model)
    }

    fn endpoint(&self) -> String {
        match &self.auth {
            OpenAiAuth::ApiKey(_) => {
                format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
            }
            OpenAiAuth::Azure {
                endpoint,
                api_version,
                ..
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={api_version}",
                endpoint.trim_end_matches('/'),
                self.model
            ),
        }
    }

    fn build_request(&self, request: ModelRequest<'_>) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &self.system {
            messages.push(ApiMessage::System {
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(Self::message_to_api));

        let tools: Vec<ApiTool> = request.tools.iter().map(Self::tool_to_api).collect();
        let tool_choice = (!tools.is_empty()).then_some(match request.tool_choice {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        });

        ApiRequest {
            model: self.model.clone(),
            messages,
            tools,
            tool_choice,
            max_tokens: self.max_tokens,
        }
    }

    fn message_to_api(msg: &Message) -> ApiMessage {
        match msg {
            Message::User { text } => ApiMessage::User {
                content: text.clone(),
            },
            Message::Assistant { text, tool_calls } => ApiMessage::Assistant {
                content: text.clone(),
                tool_calls: tool_calls
                    .iter()
                    .map(|call| ApiToolCall {
                        id: call.id.clone(),
                        call_type: "function",
                        function: ApiFunctionCall {
                            name: call.name.clone(),
                            arguments: arguments_text(&call.arguments),
                        },
                    })
                    .collect(),
            },
            Message::ToolResult {
                tool_call_id,
                tool_name,
                text,
            } => ApiMessage::Tool {
                tool_call_id: tool_call_id.clone(),
                name: tool_name.clone(),
                content: text.clone(),
            },
        }
    }

    fn tool_to_api(descriptor: &ToolDescriptor) -> ApiTool {
        ApiTool {
            tool_type: "function",
            function: ApiFunction {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.input_schema.clone(),
            },
        }
    }

    fn parse_response(api_response: ApiResponse) -> Result<ModelResponse, ModelError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        let finish_reason = match choice.finish_reason.as_deref() {
            None | Some("stop") => FinishReason::Stop,
            Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
        };

        let usage = api_response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

/// Arguments as the JSON text the chat completions API expects.
fn arguments_text(arguments: &Value) -> String {
    match arguments {
        Value::String(text) => text.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({}, auth={})", self.model, self.auth)
    }
}

impl Backend for OpenAiBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = self.build_request(request);
        debug!(
            model = %self.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            "sending chat completion request"
        );

        let req = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header("accept", "application/json");

        let req = self.auth.apply_headers(req);

        let response = req
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        Self::parse_response(api_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::builder(OpenAiAuth::ApiKey("sk-test".into()), "gpt-4o").build()
    }

    #[test]
    fn auth_display() {
        let azure = OpenAiAuth::Azure {
            api_key: "k".into(),
            endpoint: "https://example.openai.azure.com".into(),
            api_version: "2024-10-21".into(),
        };
        assert_eq!(OpenAiAuth::ApiKey("k".into()).to_string(), "api_key");
        assert_eq!(azure.to_string(), "azure");
        assert_eq!(backend().to_string(), "openai(gpt-4o, auth=api_key)");
    }

    #[test]
    fn endpoints() {
        assert_eq!(
            backend().endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );

        let custom = OpenAiBackend::builder(OpenAiAuth::ApiKey("k".into()), "llama3")
            .base_url("http://localhost:11434/v1/")
            .build();
        assert_eq!(custom.endpoint(), "http://localhost:11434/v1/chat/completions");

        let azure = OpenAiBackend::builder(
            OpenAiAuth::Azure {
                api_key: "k".into(),
                endpoint: "https://example.openai.azure.com/".into(),
                api_version: "2024-10-21".into(),
            },
            "gpt-4.1",
        )
        .build();
        assert_eq!(
            azure.endpoint(),
            "https://example.openai.azure.com/openai/deployments/gpt-4.1/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn request_shape() {
        let messages = [
            Message::user("What is 54 + 2 * 3?"),
            Message::assistant(
                "",
                vec![ToolCallRequest {
                    id: "call_1".into(),
                    name: "multiply".into(),
                    arguments: json!(r#"{"a": 2, "b": 3}"#),
                }],
            ),
            Message::tool_result("call_1", "multiply", "6"),
        ];
        let tools = [ToolDescriptor::new(
            "multiply",
            "Multiply two numbers",
            json!({"type": "object", "properties": {"a": {"type": "integer"}}}),
        )];
        let request = OpenAiBackend::builder(OpenAiAuth::ApiKey("k".into()), "gpt-4o")
            .system("use tools")
            .build()
            .build_request(ModelRequest {
                messages: &messages,
                tools: &tools,
                tool_choice: ToolChoice::Auto,
            });
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "multiply");
        assert_eq!(json["tools"][0]["function"]["parameters"]["type"], "object");

        let msgs = json["messages"].as_array().unwrap();
        assert_eq!(msgs[0], json!({"role": "system", "content": "use tools"}));
        assert_eq!(msgs[1], json!({"role": "user", "content": "What is 54 + 2 * 3?"}));
        assert_eq!(msgs[2]["role"], "assistant");
        assert_eq!(msgs[2]["content"], "");
        assert_eq!(msgs[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(msgs[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            msgs[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"a": 2, "b": 3}"#
        );
        assert_eq!(
            msgs[3],
            json!({"role": "tool", "tool_call_id": "call_1", "name": "multiply", "content": "6"})
        );
    }

    #[test]
    fn request_without_tools() {
        let messages = [Message::user("hi")];
        let request = backend().build_request(ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::None,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        // a plain assistant reply carries no tool_calls key
        let assistant = serde_json::to_value(OpenAiBackend::message_to_api(&Message::assistant(
            "done",
            Vec::new(),
        )))
        .unwrap();
        assert_eq!(assistant, json!({"role": "assistant", "content": "done"}));
    }

    #[test]
    fn structured_arguments_become_text() {
        assert_eq!(arguments_text(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(arguments_text(&json!("{\"a\":1}")), r#"{"a":1}"#);
        assert_eq!(arguments_text(&Value::Null), "{}");
    }

    #[test]
    fn parse_tool_call_response() {
        let api: ApiResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\": 54, \"b\": 6}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 80, "completion_tokens": 20, "total_tokens": 100}
        }))
        .unwrap();
        let response = OpenAiBackend::parse_response(api).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.tool_calls[0].arguments, json!("{\"a\": 54, \"b\": 6}"));
        assert_eq!(response.usage.input_tokens, 80);
        assert_eq!(response.usage.output_tokens, 20);
    }

    #[test]
    fn parse_text_response() {
        let api: ApiResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "60", "tool_calls": null},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();
        let response = OpenAiBackend::parse_response(api).unwrap();
        assert_eq!(response.content.as_deref(), Some("60"));
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn parse_empty_choices_fails() {
        let api: ApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            OpenAiBackend::parse_response(api),
            Err(ModelError::InvalidResponse(_))
        ));
    }
}
