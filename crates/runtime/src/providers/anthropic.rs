//! Anthropic messages API backend.

use crate::arguments::decode_arguments;
use crate::catalog::ToolDescriptor;
use crate::conversation::{Message, ToolCallRequest};
use crate::model::{
    Backend, FinishReason, ModelError, ModelRequest, ModelResponse, ToolChoice, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ApiToolChoice>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ApiToolChoice {
    Auto,
    None,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    api_key: String,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    base_url: String,
}

impl AnthropicBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            base_url: ANTHROPIC_API_URL.to_string(),
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

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> AnthropicBackend {
        AnthropicBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            system: self.system,
            base_url: self.base_url,
        }
    }
}

/// Anthropic API backend.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    base_url: String,
}

impl AnthropicBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(api_key, model)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: ModelRequest<'_>) -> ApiRequest {
        let tools: Vec<ApiTool> = request.tools.iter().map(Self::tool_to_api).collect();
        let tool_choice = (!tools.is_empty()).then_some(match request.tool_choice {
            ToolChoice::Auto => ApiToolChoice::Auto,
            ToolChoice::None => ApiToolChoice::None,
        });

        ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: Self::messages_to_api(request.messages),
            system: self.system.clone(),
            tools,
            tool_choice,
        }
    }

    /// Tool results following an assistant turn share one user message.
    fn messages_to_api(messages: &[Message]) -> Vec<ApiMessage> {
        let mut out: Vec<ApiMessage> = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg {
                Message::User { text } => out.push(ApiMessage {
                    role: "user",
                    content: ApiContent::Text(text.clone()),
                }),
                Message::Assistant { text, tool_calls } if tool_calls.is_empty() => {
                    out.push(ApiMessage {
                        role: "assistant",
                        content: ApiContent::Text(text.clone()),
                    })
                }
                Message::Assistant { text, tool_calls } => {
                    let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
                    if !text.is_empty() {
                        blocks.push(ApiContentBlock::Text { text: text.clone() });
                    }
                    blocks.extend(tool_calls.iter().map(|call| ApiContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: Value::Object(decode_arguments(&call.arguments)),
                    }));
                    out.push(ApiMessage {
                        role: "assistant",
                        content: ApiContent::Blocks(blocks),
                    });
                }
                Message::ToolResult {
                    tool_call_id, text, ..
                } => {
                    let block = ApiContentBlock::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: text.clone(),
                    };
                    match out.last_mut() {
                        Some(ApiMessage {
                            role: "user",
                            content: ApiContent::Blocks(blocks),
                        }) => blocks.push(block),
                        _ => out.push(ApiMessage {
                            role: "user",
                            content: ApiContent::Blocks(vec![block]),
                        }),
                    }
                }
            }
        }

        out
    }

    fn tool_to_api(descriptor: &ToolDescriptor) -> ApiTool {
        ApiTool {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.clone(),
        }
    }

    fn parse_response(api_response: ApiResponse) -> ModelResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in api_response.content {
            match block {
                ApiResponseBlock::Text { text: t } => text.push_str(&t),
                ApiResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest {
                        id,
                        name,
                        arguments: input,
                    })
                }
                ApiResponseBlock::Unknown => {}
            }
        }

        let finish_reason = match api_response.stop_reason.as_deref() {
            None | Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("tool_use") => FinishReason::ToolCalls,
            Some("max_tokens") => FinishReason::Length,
            Some("refusal") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
        };

        ModelResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            finish_reason,
            usage: Usage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        }
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({})", self.model)
    }
}

impl Backend for AnthropicBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = self.build_request(request);
        debug!(
            model = %self.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            "sending anthropic request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .header("x-api-key", &self.api_key)
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

        Ok(Self::parse_response(api_response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> AnthropicBackend {
        AnthropicBackend::builder("test", "claude-sonnet-4-20250514")
            .max_tokens(1000)
            .system("be brief")
            .build()
    }

    fn add_tool() -> ToolDescriptor {
        ToolDescriptor::new("add", "Add two numbers", json!({"type": "object"}))
    }

    #[test]
    fn display() {
        assert_eq!(backend().to_string(), "anthropic(claude-sonnet-4-20250514)");
        assert_eq!(backend().endpoint(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn request_advertises_tools_with_auto_choice() {
        let messages = [Message::user("What is 2 + 3?")];
        let tools = [add_tool()];
        let request = backend().build_request(ModelRequest {
            messages: &messages,
            tools: &tools,
            tool_choice: ToolChoice::Auto,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["system"], "be brief");
        assert_eq!(json["tools"][0]["name"], "add");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(json["tool_choice"], json!({"type": "auto"}));
        assert_eq!(json["messages"][0], json!({"role": "user", "content": "What is 2 + 3?"}));
    }

    #[test]
    fn request_without_tools_omits_tool_fields() {
        let messages = [Message::user("hi")];
        let request = backend().build_request(ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::None,
        });
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[test]
    fn tool_turn_conversion() {
        let messages = [
            Message::user("q"),
            Message::assistant(
                "",
                vec![
                    ToolCallRequest {
                        id: "toolu_1".into(),
                        name: "add".into(),
                        arguments: json!({"a": 1, "b": 2}),
                    },
                    ToolCallRequest {
                        id: "toolu_2".into(),
                        name: "add".into(),
                        arguments: json!(r#"{"a": 3, "b": 4}"#),
                    },
                ],
            ),
            Message::tool_result("toolu_1", "add", "3"),
            Message::tool_result("toolu_2", "add", "7"),
        ];
        let api = serde_json::to_value(AnthropicBackend::messages_to_api(&messages)).unwrap();

        assert_eq!(api.as_array().unwrap().len(), 3);
        let assistant = &api[1];
        assert_eq!(assistant["role"], "assistant");
        // empty text is not sent as a block
        assert_eq!(assistant["content"].as_array().unwrap().len(), 2);
        assert_eq!(assistant["content"][0]["type"], "tool_use");
        assert_eq!(assistant["content"][1]["input"], json!({"a": 3, "b": 4}));

        let results = &api[2];
        assert_eq!(results["role"], "user");
        assert_eq!(
            results["content"],
            json!([
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "3"},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": "7"}
            ])
        );
    }

    #[test]
    fn parse_tool_use_response() {
        let api: ApiResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me add."},
                {"type": "tool_use", "id": "toolu_1", "name": "add", "input": {"a": 54, "b": 6}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        let response = AnthropicBackend::parse_response(api);
        assert_eq!(response.content.as_deref(), Some("Let me add."));
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments, json!({"a": 54, "b": 6}));
        assert_eq!(response.usage.input_tokens, 10);
    }

    #[test]
    fn parse_empty_text_as_absent() {
        let api: ApiResponse = serde_json::from_value(json!({
            "content": [],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 0}
        }))
        .unwrap();
        let response = AnthropicBackend::parse_response(api);
        assert!(response.content.is_none());
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }
}
