use std::path::{Path, PathBuf};
use std::time::Duration;

use consensus_engine::debate::config::{
    DEFAULT_AGENT_TIMEOUT_MS, DEFAULT_MAX_ROUNDS, DEFAULT_MIN_ROUNDS, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TEMPERATURE, DEFAULT_THRESHOLD,
};
use consensus_engine::{Agent, ConfigError, DebateConfig, ScoringConfig, SimilarityConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::worst_case_duration;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Four attempts of 25s plus 14s of backoff fit inside the 120s agent timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 25;
pub const MAX_RETRIES_LIMIT: u32 = 8;
pub const DEFAULT_AGENT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error("provider.request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("provider.max_retries must be at most {limit}, got {value}")]
    TooManyRetries { value: u32, limit: u32 },

    #[error(
        "retries need up to {worst_case_ms} ms but debate.agent_timeout_ms is {agent_timeout_ms}; \
         lower provider.request_timeout_secs or provider.max_retries"
    )]
    RetryBudgetExceedsAgentTimeout {
        worst_case_ms: u128,
        agent_timeout_ms: u64,
    },
}

/// `[debate]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_id: Option<String>,
    pub question: String,
    pub context: String,
    pub threshold: f64,
    pub min_rounds: u32,
    pub max_rounds: u32,
    pub agent_timeout_ms: u64,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for DebateSection {
    fn default() -> Self {
        Self {
            debate_id: None,
            question: String::new(),
            context: String::new(),
            threshold: DEFAULT_THRESHOLD,
            min_rounds: DEFAULT_MIN_ROUNDS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            agent_timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// `[provider]` table: where chat completions and embeddings are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible base URL for `/chat/completions`.
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL for `/embeddings`.
    pub embedding_base_url: String,
    /// Falls back to `api_key` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            embedding_base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            embedding_api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ProviderConfig {
    pub fn embedding_key(&self) -> Option<&str> {
        self.embedding_api_key
            .as_deref()
            .or(self.api_key.as_deref())
    }
}

/// Whole runner configuration file.
///
/// Precedence, lowest first: built-in defaults, the TOML file,
/// environment variables, command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub debate: DebateSection,
    pub scoring: ScoringConfig,
    pub similarity: SimilarityConfig,
    pub provider: ProviderConfig,
    pub agents: Vec<Agent>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            debate: DebateSection::default(),
            scoring: ScoringConfig::default(),
            similarity: SimilarityConfig::default(),
            provider: ProviderConfig::default(),
            agents: default_panel(),
        }
    }
}

/// The four-model panel used when no `[[agents]]` are configured.
pub fn default_panel() -> Vec<Agent> {
    vec![
        Agent::new(
            "Claude Sonnet 4.5",
            "anthropic/claude-sonnet-4.5",
            DEFAULT_AGENT_MAX_TOKENS,
        ),
        Agent::new("GPT-5 Codex", "openai/gpt-5-codex", DEFAULT_AGENT_MAX_TOKENS),
        Agent::new(
            "Gemini 2.5 PRO",
            "google/gemini-2.5-pro",
            DEFAULT_AGENT_MAX_TOKENS,
        ),
        Agent::new("Grok 4", "x-ai/grok-4", DEFAULT_AGENT_MAX_TOKENS),
    ]
}

impl RunnerConfig {
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigFileError> {
        let mut config: Self = toml::from_str(raw).map_err(|source| ConfigFileError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        if config.agents.is_empty() {
            config.agents = default_panel();
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Environment overrides, read from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Environment overrides, read through `lookup`.
    ///
    /// `DEBATE_API_KEY` wins over `OPENROUTER_API_KEY`; `DEBATE_EMBEDDING_API_KEY`
    /// wins over `OPENAI_API_KEY`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("DEBATE_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(key) = get("DEBATE_API_KEY").or_else(|| get("OPENROUTER_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = get("DEBATE_EMBEDDING_BASE_URL") {
            self.provider.embedding_base_url = url;
        }
        if let Some(key) = get("DEBATE_EMBEDDING_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.provider.embedding_api_key = Some(key);
        }
        if let Some(model) = get("DEBATE_EMBEDDING_MODEL") {
            self.provider.embedding_model = model;
        }
    }

    pub fn to_debate_config(&self) -> DebateConfig {
        DebateConfig {
            debate_id: self.debate.debate_id.clone(),
            question: self.debate.question.clone(),
            context: self.debate.context.clone(),
            agents: self.agents.clone(),
            threshold: self.debate.threshold,
            min_rounds: self.debate.min_rounds,
            max_rounds: self.debate.max_rounds,
            agent_timeout_ms: self.debate.agent_timeout_ms,
            temperature: self.debate.temperature,
            system_prompt: self.debate.system_prompt.clone(),
            scoring: self.scoring.clone(),
        }
    }

    /// Build and validate the engine config without touching the network.
    pub fn validated(&self) -> Result<DebateConfig, ConfigFileError> {
        let config = self.to_debate_config();
        config.validate()?;
        self.validate_retry_budget()?;
        Ok(config)
    }

    /// A provider call, retries included, must finish before the engine's
    /// per-agent timeout cancels it.
    fn validate_retry_budget(&self) -> Result<(), ConfigFileError> {
        let provider = &self.provider;
        if provider.request_timeout_secs == 0 {
            return Err(ConfigFileError::ZeroRequestTimeout);
        }
        if provider.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigFileError::TooManyRetries {
                value: provider.max_retries,
                limit: MAX_RETRIES_LIMIT,
            });
        }
        let worst_case = worst_case_duration(
            provider.max_retries,
            Duration::from_secs(provider.request_timeout_secs),
        );
        if worst_case > Duration::from_millis(self.debate.agent_timeout_ms) {
            return Err(ConfigFileError::RetryBudgetExceedsAgentTimeout {
                worst_case_ms: worst_case.as_millis(),
                agent_timeout_ms: self.debate.agent_timeout_ms,
            });
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigFileError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the default configuration to `path`. Credentials are never written.
    pub fn write_default(path: &Path) -> Result<(), ConfigFileError> {
        let rendered = Self::default().to_toml()?;
        std::fs::write(path, rendered).map_err(|source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
