//! Debate configuration and up-front validation.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::Agent;
use crate::scoring::ScoringConfig;

pub const DEFAULT_THRESHOLD: f64 = 0.75;
pub const DEFAULT_MIN_ROUNDS: u32 = 3;
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_TEMPERATURE: f32 = 0.4;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert AI participant in a structured debate.";

/// Rejected configuration. Raised before any agent is contacted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("at least one agent is required")]
    NoAgents,

    #[error("agent name must not be empty")]
    EmptyAgentName,

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("min_rounds must be at least 1")]
    InvalidMinRounds,

    #[error("max_rounds ({max}) must be >= min_rounds ({min})")]
    InvalidMaxRounds { min: u32, max: u32 },

    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("agent_timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("no_vote_consensus must be in [0, 1], got {0}")]
    InvalidNoVoteConsensus(f64),
}

/// Everything needed to run one debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Generated when absent.
    pub debate_id: Option<String>,
    pub question: String,
    pub context: String,
    pub agents: Vec<Agent>,
    /// Score at or above which the debate converges (after `min_rounds`).
    pub threshold: f64,
    pub min_rounds: u32,
    pub max_rounds: u32,
    /// Per-agent, per-round deadline.
    pub agent_timeout_ms: u64,
    pub temperature: f32,
    pub system_prompt: String,
    /// Weights and vote handling.
    pub scoring: ScoringConfig,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            debate_id: None,
            question: String::new(),
            context: String::new(),
            agents: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            min_rounds: DEFAULT_MIN_ROUNDS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            agent_timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl DebateConfig {
    pub fn new(question: impl Into<String>, agents: Vec<Agent>) -> Self {
        Self {
            question: question.into(),
            agents,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_rounds(mut self, min_rounds: u32, max_rounds: u32) -> Self {
        self.min_rounds = min_rounds;
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.question.trim().is_empty() {
            return Err(ConfigError::EmptyQuestion);
        }
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::EmptyAgentName);
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.name.clone()));
            }
        }

        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.min_rounds < 1 {
            return Err(ConfigError::InvalidMinRounds);
        }
        if self.max_rounds < self.min_rounds {
            return Err(ConfigError::InvalidMaxRounds {
                min: self.min_rounds,
                max: self.max_rounds,
            });
        }

        let scoring = &self.scoring;
        for (name, value) in [
            ("semantic_weight", scoring.semantic_weight),
            ("vote_weight", scoring.vote_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        if !(0.0..=1.0).contains(&scoring.no_vote_consensus) {
            return Err(ConfigError::InvalidNoVoteConsensus(
                scoring.no_vote_consensus,
            ));
        }

        if self.agent_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
