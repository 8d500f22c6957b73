// ABOUTME: Configuration file handling.
// ABOUTME: TOML config with env var and .env support; CLI flags take precedence.

use anyhow::{Context, Result};
use parley_chat::{ollama, ChatSession, OllamaProvider};
use parley_ext::{ExtensionDefinition, ExtensionsConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default = "default_extensions")]
    pub extensions: ExtensionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            chat: ChatConfig::default(),
            extensions: default_extensions(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Connection timeout; streaming itself is unbounded
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    ollama::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    ollama::DEFAULT_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_extensions() -> ExtensionsConfig {
    ExtensionsConfig {
        extensions: vec![
            ExtensionDefinition::new("citations"),
            ExtensionDefinition::new("token-counter"),
        ],
        ..ExtensionsConfig::default()
    }
}

impl Config {
    /// Load config with precedence: CLI > env > .env > file > defaults
    pub fn load(path_override: Option<&Path>, model_override: Option<&str>) -> Result<Self> {
        // Load .env file if present (silently ignore if missing)
        let _ = dotenvy::dotenv();

        let path = match path_override {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());

        if let Some(model) = model_override {
            config.provider.model = model.to_string();
        }
        Ok(config)
    }

    /// Read a config file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Apply PARLEY_* overrides from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PARLEY_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("PARLEY_MODEL") {
            self.provider.model = model;
        }
        if let Some(secs) = lookup("PARLEY_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(secs) => self.provider.timeout_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "Ignoring invalid PARLEY_TIMEOUT_SECS"),
            }
        }
        if let Some(prompt) = lookup("PARLEY_SYSTEM_PROMPT") {
            self.chat.system_prompt = Some(prompt);
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not find config directory")?;
        Ok(config_dir.join("parley").join("config.toml"))
    }

    pub fn ollama(&self) -> Result<OllamaProvider> {
        OllamaProvider::new(
            &self.provider.base_url,
            self.provider.model.clone(),
            Duration::from_secs(self.provider.timeout_secs),
        )
        .with_context(|| format!("Invalid provider URL {}", self.provider.base_url))
    }

    /// A fresh session against the configured provider
    pub fn session(&self) -> Result<ChatSession> {
        let session = ChatSession::new(Arc::new(self.ollama()?));
        Ok(match &self.chat.system_prompt {
            Some(prompt) => session.with_system_prompt(prompt.clone()),
            None => session,
        })
    }
}
