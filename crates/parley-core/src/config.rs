//! Configuration management for Parley
//!
//! Handles loading and saving the TOML configuration: provider settings,
//! orchestration limits and the optional tool server command.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    /// Tool server launched over stdio; in-process tools are used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpConfig>,
}

/// Completion provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider type: "openai", "anthropic", "gemini", etc.
    pub provider_type: String,
    /// Model to use
    pub model: String,
    /// API key (can be loaded from env)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable name for API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    /// Requests whose estimated size exceeds this are refused locally
    pub max_request_chars: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            max_tokens: 1024,
            max_request_chars: 200_000,
        }
    }
}

impl ProviderConfig {
    /// Get the API key, checking environment variable if not set directly
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_name = self
            .api_key_env
            .as_deref()
            .or_else(|| default_api_key_env(&self.provider_type))?;

        std::env::var(env_name).ok().filter(|key| !key.is_empty())
    }

    /// Point at another provider, taking its default model and its
    /// conventional key variable. genai picks the adapter from the model name.
    pub fn switch_provider(&mut self, provider_type: &str) {
        if self.provider_type == provider_type {
            return;
        }
        self.provider_type = provider_type.to_string();
        self.api_key = None;
        self.api_key_env = None;
        if let Some(model) = default_model(provider_type) {
            self.model = model.to_string();
        }
    }
}

/// Model used for a provider when none is given
pub fn default_model(provider_type: &str) -> Option<&'static str> {
    match provider_type {
        "openai" => Some("gpt-4o-mini"),
        "anthropic" => Some("claude-3-5-haiku-latest"),
        "gemini" | "google" => Some("gemini-2.0-flash"),
        "groq" => Some("llama-3.1-8b-instant"),
        "deepseek" => Some("deepseek-chat"),
        "xai" | "grok" => Some("grok-3-mini"),
        _ => None,
    }
}

fn default_api_key_env(provider_type: &str) -> Option<&'static str> {
    match provider_type {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "xai" | "grok" => Some("XAI_API_KEY"),
        _ => None,
    }
}

/// What happens when the model still wants tools on the last permitted round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundLimitPolicy {
    /// Record the text that came back as the answer and discard the calls
    #[default]
    ForceAnswer,
    /// Fail the turn with `Error::RoundLimitExceeded`
    Error,
}

/// Orchestration loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Completion requests allowed per user turn
    pub max_rounds: usize,
    pub round_limit: RoundLimitPolicy,
    /// Offer tool schemas on the last permitted round
    pub offer_tools_on_final_round: bool,
    /// Run a batch of tool calls concurrently
    pub parallel_tools: bool,
    pub tool_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            round_limit: RoundLimitPolicy::ForceAnswer,
            offer_tools_on_final_round: false,
            parallel_tools: false,
            tool_timeout_secs: 30,
            system_prompt: None,
        }
    }
}

impl OrchestrationConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(Error::Config("max_rounds must be at least 1".to_string()));
        }
        if self.tool_timeout_secs == 0 {
            return Err(Error::Config("tool_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Tool server subprocess
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl McpConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path; a missing file means defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self { config_path, config })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("parley").join("config.toml"))
    }

    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.orchestration.validate()?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}
