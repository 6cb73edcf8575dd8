//! Completion service adapters.
//!
//! Each provider implements [`Backend`] for its specific API. [`Provider`]
//! wraps them so callers can pick one at runtime from configuration.

mod anthropic;
mod openai;

pub use anthropic::{AnthropicBackend, AnthropicBackendBuilder};
pub use openai::{OpenAiAuth, OpenAiBackend, OpenAiBackendBuilder};

use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};

/// A backend chosen at runtime.
pub enum Provider {
    OpenAi(OpenAiBackend),
    Anthropic(AnthropicBackend),
}

impl From<OpenAiBackend> for Provider {
    fn from(backend: OpenAiBackend) -> Self {
        Self::OpenAi(backend)
    }
}

impl From<AnthropicBackend> for Provider {
    fn from(backend: AnthropicBackend) -> Self {
        Self::Anthropic(backend)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi(backend) => backend.fmt(f),
            Self::Anthropic(backend) => backend.fmt(f),
        }
    }
}

impl Backend for Provider {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        match self {
            Self::OpenAi(backend) => backend.call(request).await,
            Self::Anthropic(backend) => backend.call(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_delegates() {
        let openai: Provider =
            OpenAiBackend::builder(OpenAiAuth::ApiKey("k".into()), "gpt-4o").build().into();
        assert_eq!(openai.to_string(), "openai(gpt-4o, auth=api_key)");

        let anthropic: Provider = AnthropicBackend::builder("k", "claude-sonnet-4-20250514")
            .build()
            .into();
        assert_eq!(anthropic.to_string(), "anthropic(claude-sonnet-4-20250514)");
    }
}
