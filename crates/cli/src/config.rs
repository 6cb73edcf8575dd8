//! Configuration loading from toolrelay.toml and secret resolution.

use mcp::ServerConfig;
use runtime::{AnthropicBackend, OpenAiAuth, OpenAiBackend, OrchestratorConfig, Provider};
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

const SECRET_PLACEHOLDER: &str = "{secret}";

const AZURE_ENDPOINT_ENV: &str = "AZURE_GPT41_API_BASE";
const AZURE_VERSION_ENV: &str = "AZURE_GPT41_API_VERSION";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Tool server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Turn loop settings.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Completion provider configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// `openai`, `azure` or `anthropic`.
    pub provider: String,

    /// Model (or Azure deployment) name. Defaults per provider.
    pub model: Option<String>,

    pub max_tokens: Option<u32>,

    /// Environment variable holding the API key. Defaults per provider.
    pub api_key_env: Option<String>,

    /// API base URL; the resource endpoint for Azure.
    pub base_url: Option<String>,

    /// Azure API version.
    pub api_version: Option<String>,

    /// System prompt.
    pub system: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            max_tokens: None,
            api_key_env: None,
            base_url: None,
            api_version: None,
            system: None,
        }
    }
}

/// MCP server process configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub name: String,
    pub command: String,

    /// Arguments; `{secret}` is replaced with the resolved secret.
    pub args: Vec<String>,

    /// Environment variable holding the server's secret. Empty for none.
    pub secret_env: String,

    pub timeout_secs: u64,

    /// Extra environment for the server process.
    pub env: HashMap<String, String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "figma".to_string(),
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "figma-developer-mcp".to_string(),
                format!("--figma-api-key={SECRET_PLACEHOLDER}"),
                "--stdio".to_string(),
            ],
            secret_env: "FIGMA_TOKEN".to_string(),
            timeout_secs: mcp::DEFAULT_TIMEOUT.as_secs(),
            env: HashMap::new(),
        }
    }
}

/// Turn loop configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Completion calls per query; 0 removes the cap.
    pub max_turns: usize,

    /// Re-list tools before every completion call.
    pub refresh_catalog: bool,

    pub tool_timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: runtime::DEFAULT_MAX_TURNS,
            refresh_catalog: false,
            tool_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, otherwise use the built-in defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build the tool server process configuration.
    pub fn server_config(&self, secrets: &Secrets) -> Result<ServerConfig, ConfigError> {
        let server = &self.server;
        let mut config = ServerConfig::new(&server.name, &server.command);
        config.timeout = Duration::from_secs(server.timeout_secs);
        config.env = server.env.clone();

        if server.secret_env.is_empty() {
            config.args = server.args.clone();
        } else {
            let secret = secrets.require(&server.secret_env)?;
            config.args = server
                .args
                .iter()
                .map(|arg| arg.replace(SECRET_PLACEHOLDER, &secret))
                .collect();
            config.env.insert(server.secret_env.clone(), secret);
        }

        Ok(config)
    }

    /// Build the completion backend.
    pub fn provider(&self, secrets: &Secrets) -> Result<Provider, ConfigError> {
        let completion = &self.completion;
        let api_key_env = |default: &str| {
            completion
                .api_key_env
                .clone()
                .unwrap_or_else(|| default.to_string())
        };

        match completion.provider.as_str() {
            "openai" => {
                let key = secrets.require(&api_key_env("OPENAI_API_KEY"))?;
                let model = completion.model.as_deref().unwrap_or("gpt-4o");
                let mut builder = OpenAiBackend::builder(OpenAiAuth::ApiKey(key), model);
                if let Some(base_url) = &completion.base_url {
                    builder = builder.base_url(base_url);
                }
                if let Some(max_tokens) = completion.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                if let Some(system) = &completion.system {
                    builder = builder.system(system);
                }
                Ok(builder.build().into())
            }
            "azure" => {
                let auth = OpenAiAuth::Azure {
                    api_key: secrets.require(&api_key_env("AZURE_GPT41_API_KEY"))?,
                    endpoint: match &completion.base_url {
                        Some(endpoint) => endpoint.clone(),
                        None => secrets.require(AZURE_ENDPOINT_ENV)?,
                    },
                    api_version: match &completion.api_version {
                        Some(version) => version.clone(),
                        None => secrets.require(AZURE_VERSION_ENV)?,
                    },
                };
                let model = completion.model.as_deref().unwrap_or("gpt-4.1");
                let mut builder = OpenAiBackend::builder(auth, model);
                if let Some(max_tokens) = completion.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                if let Some(system) = &completion.system {
                    builder = builder.system(system);
                }
                Ok(builder.build().into())
            }
            "anthropic" => {
                let key = secrets.require(&api_key_env("ANTHROPIC_API_KEY"))?;
                let model = completion
                    .model
                    .as_deref()
                    .unwrap_or("claude-sonnet-4-20250514");
                let mut builder = AnthropicBackend::builder(key, model);
                if let Some(base_url) = &completion.base_url {
                    builder = builder.base_url(base_url);
                }
                if let Some(max_tokens) = completion.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                if let Some(system) = &completion.system {
                    builder = builder.system(system);
                }
                Ok(builder.build().into())
            }
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }

    /// Turn loop settings.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_turns: (self.agent.max_turns > 0).then_some(self.agent.max_turns),
            refresh_catalog: self.agent.refresh_catalog,
            tool_timeout: self.agent.tool_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Secrets resolved once at startup.
///
/// Lookups consult the process environment first, then the `.env` file.
/// Neither source is modified.
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    env: HashMap<String, String>,
    dotenv: HashMap<String, String>,
}

impl Secrets {
    pub fn new(env: HashMap<String, String>, dotenv: HashMap<String, String>) -> Self {
        Self { env, dotenv }
    }

    /// Snapshot the process environment and read `dotenv_path` if present.
    pub fn from_process(dotenv_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dotenv = match std::fs::read_to_string(dotenv_path.as_ref()) {
            Ok(content) => parse_dotenv(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(unicode_vars(std::env::vars_os()), dotenv))
    }

    pub fn get(&self, var: &str) -> Option<&str> {
        self.env
            .get(var)
            .filter(|v| !v.is_empty())
            .or_else(|| self.dotenv.get(var).filter(|v| !v.is_empty()))
            .map(String::as_str)
    }

    pub fn require(&self, var: &str) -> Result<String, ConfigError> {
        self.get(var)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingSecret {
                var: var.to_string(),
            })
    }
}

/// Keep the variables whose name and value are both valid Unicode.
fn unicode_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
/// `export ` prefix is allowed, and matching quotes around values are removed.
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|&q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{var} environment variable not set")]
    MissingSecret { var: String },

    #[error("unknown completion provider '{0}': expected openai, azure or anthropic")]
    UnknownProvider(String),
}
