use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use switchyard_gateway::RelaySettings;
use switchyard_runtime::catalog::{ANTHROPIC_MODELS, GEMINI_MODELS, OPENAI_MODELS};
use switchyard_runtime::{Provider, ProviderCatalog, ProviderSettings, RetryPolicy};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Empty means any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,

    #[serde(default)]
    pub anthropic: ProviderConfig,

    #[serde(default)]
    pub gemini: ProviderConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Falls back to the provider's environment variable
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Replaces the built-in model list when set
    #[serde(default)]
    pub models: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_message_bytes() -> usize {
    50_000
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_send_timeout() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_generation_timeout() -> u64 {
    300
}

fn default_history_limit() -> usize {
    20
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_db_path() -> PathBuf {
    PathBuf::from("switchyard.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_message_bytes: default_max_message_bytes(),
            drain_timeout_secs: default_drain_timeout(),
            send_timeout_secs: default_send_timeout(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            generation_timeout_secs: default_generation_timeout(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            models: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: default_db_path(),
        }
    }
}

/// Environment variables consulted, in order, when a provider has no `api_key`.
pub fn api_key_vars(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::OpenAI => &["OPENAI_API_KEY"],
        Provider::Anthropic => &["ANTHROPIC_API_KEY"],
        Provider::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
    }
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::OpenAI => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Gemini => &self.gemini,
        }
    }
}

impl Config {
    /// Model catalog from the configured lists, or the built-in ones.
    /// Fails when two providers claim the same model.
    pub fn catalog(&self) -> Result<ProviderCatalog> {
        let entries = Provider::ALL.into_iter().map(|provider| {
            let models = match &self.providers.get(provider).models {
                Some(models) => models.clone(),
                None => builtin_models(provider)
                    .iter()
                    .map(|m| m.to_string())
                    .collect(),
            };
            (provider, models)
        });
        ProviderCatalog::new(entries).context("Invalid provider model configuration")
    }

    pub fn provider_settings(&self) -> HashMap<Provider, ProviderSettings> {
        self.provider_settings_with(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::provider_settings`] with an injectable environment.
    pub fn provider_settings_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> HashMap<Provider, ProviderSettings> {
        Provider::ALL
            .into_iter()
            .map(|provider| {
                let cfg = self.providers.get(provider);
                let api_key = cfg
                    .api_key
                    .clone()
                    .filter(|key| !key.is_empty())
                    .or_else(|| {
                        api_key_vars(provider)
                            .iter()
                            .find_map(|var| env(var).filter(|v| !v.is_empty()))
                    })
                    .unwrap_or_default();

                let mut settings =
                    ProviderSettings::new(&api_key).with_max_tokens(cfg.max_tokens);
                if let Some(base_url) = &cfg.base_url {
                    settings = settings.with_base_url(base_url);
                }
                (provider, settings)
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.relay.retry_attempts,
            Duration::from_millis(self.relay.retry_delay_ms),
        )
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            max_message_bytes: self.server.max_message_bytes,
            generation_timeout: Duration::from_secs(self.relay.generation_timeout_secs),
            history_limit: self.relay.history_limit,
            drain_timeout: Duration::from_secs(self.server.drain_timeout_secs),
            send_timeout: Duration::from_secs(self.server.send_timeout_secs),
        }
    }
}

fn builtin_models(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::OpenAI => OPENAI_MODELS,
        Provider::Anthropic => ANTHROPIC_MODELS,
        Provider::Gemini => GEMINI_MODELS,
    }
}

/// Load config from file or use defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            parse_config(&content)
        }
        None => Ok(Config::default()),
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("Failed to parse TOML config")
}
