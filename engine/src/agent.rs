//! Agent identities and the injected inference boundary.
//!
//! The engine never talks to a network itself. Callers hand it an
//! [`InferenceClient`] and the round executor fans prompts out through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One independently-queried language-model participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Display name; unique within a debate.
    pub name: String,
    /// Model identifier passed to the inference backend.
    pub model: String,
    /// Output token cap for every call made on behalf of this agent.
    pub max_tokens: u32,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            max_tokens,
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.model)
    }
}

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Failure of one inference call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Injected capability that sends a prompt to one model.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError>;
}
