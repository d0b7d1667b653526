//! Round execution: JoinSet fan-out to every agent, then scoring.
//!
//! ```text
//! prompt ──► JoinSet::spawn(agent_i) × N   (semaphore, per-agent timeout)
//!        ──► one AgentResponse per configured agent (failures included)
//!        ──► ConvergenceScorer over successful texts
//!        ──► RoundResult
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{Agent, InferenceClient, InferenceRequest, TransportError};
use crate::scoring::{ConvergenceScorer, ScoreMetadata};

/// One agent's answer for one round. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_name: String,
    pub model: String,
    /// Empty on failure.
    pub text: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl AgentResponse {
    pub fn succeeded(agent: &Agent, text: String, latency_ms: u64) -> Self {
        Self {
            agent_name: agent.name.clone(),
            model: agent.model.clone(),
            text,
            success: true,
            error: None,
            latency_ms,
        }
    }

    pub fn failed(agent: &Agent, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            agent_name: agent.name.clone(),
            model: agent.model.clone(),
            text: String::new(),
            success: false,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// Audit data attached to a round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundMetadata {
    /// Absent when scoring was skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoreMetadata>,
    /// Every agent failed; scoring skipped.
    #[serde(default)]
    pub no_responses: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_agents: Vec<String>,
    /// Similarity failure under the strict embedding policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_error: Option<String>,
}

/// Outcome of one round. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_number: u32,
    pub timestamp: DateTime<Utc>,
    /// Keyed by agent name; one entry per configured agent.
    pub responses: BTreeMap<String, AgentResponse>,
    pub convergence_score: f64,
    pub metadata: RoundMetadata,
}

impl RoundResult {
    pub fn successful(&self) -> impl Iterator<Item = &AgentResponse> {
        self.responses.values().filter(|r| r.success)
    }

    pub fn success_count(&self) -> usize {
        self.successful().count()
    }

    pub fn all_failed(&self) -> bool {
        self.metadata.no_responses
    }

    pub fn is_scoring_failure(&self) -> bool {
        self.metadata.scoring_error.is_some()
    }

    /// Vote histogram, empty when the round was not scored.
    pub fn histogram(&self) -> BTreeMap<String, usize> {
        self.metadata
            .scoring
            .as_ref()
            .map(|s| s.histogram.clone())
            .unwrap_or_default()
    }
}

/// Sends one round's prompt to every agent and scores the answers.
pub struct RoundExecutor {
    client: Arc<dyn InferenceClient>,
    scorer: Arc<ConvergenceScorer>,
    agent_timeout: Duration,
    temperature: f32,
    system_prompt: Arc<str>,
}

impl RoundExecutor {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        scorer: Arc<ConvergenceScorer>,
        agent_timeout: Duration,
        temperature: f32,
        system_prompt: &str,
    ) -> Self {
        Self {
            client,
            scorer,
            agent_timeout,
            temperature,
            system_prompt: Arc::from(system_prompt),
        }
    }

    /// Run one round. Transport failures become failed responses; this
    /// never returns an error.
    pub async fn execute(&self, round_number: u32, agents: &[Agent], prompt: &str) -> RoundResult {
        let responses = self.collect_responses(round_number, agents, prompt).await;
        let timestamp = Utc::now();

        let failed_agents: Vec<String> = responses
            .values()
            .filter(|r| !r.success)
            .map(|r| r.agent_name.clone())
            .collect();

        let texts: Vec<(&str, &str)> = responses
            .values()
            .filter(|r| r.success)
            .map(|r| (r.agent_name.as_str(), r.text.as_str()))
            .collect();

        let mut metadata = RoundMetadata {
            failed_agents: failed_agents.clone(),
            ..Default::default()
        };

        let convergence_score = if texts.is_empty() {
            warn!(round = round_number, "every agent failed, round not scored");
            metadata.no_responses = true;
            0.0
        } else {
            match self.scorer.score(&texts).await {
                Ok(scoring) => {
                    let score = scoring.final_score;
                    metadata.scoring = Some(scoring);
                    score
                }
                Err(e) => {
                    warn!(round = round_number, error = %e, "round scoring failed");
                    metadata.scoring_error = Some(e.to_string());
                    0.0
                }
            }
        };

        info!(
            round = round_number,
            responded = texts.len(),
            failed = failed_agents.len(),
            score = convergence_score,
            "round complete"
        );

        RoundResult {
            round_number,
            timestamp,
            responses,
            convergence_score,
            metadata,
        }
    }

    async fn collect_responses(
        &self,
        round_number: u32,
        agents: &[Agent],
        prompt: &str,
    ) -> BTreeMap<String, AgentResponse> {
        let sem = Arc::new(Semaphore::new(agents.len().max(1)));
        let prompt: Arc<str> = Arc::from(prompt);
        let mut join_set: JoinSet<AgentResponse> = JoinSet::new();

        for agent in agents {
            let sem = sem.clone();
            let client = self.client.clone();
            let agent = agent.clone();
            let request = InferenceRequest {
                model: agent.model.clone(),
                system: self.system_prompt.to_string(),
                prompt: prompt.to_string(),
                temperature: self.temperature,
                max_tokens: agent.max_tokens,
            };
            let deadline = self.agent_timeout;

            join_set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return AgentResponse::failed(&agent, e.to_string(), 0),
                };
                let start = Instant::now();
                let result = match tokio::time::timeout(deadline, client.complete(&request)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(TransportError::Timeout(deadline.as_millis() as u64)),
                };
                let latency_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(text) if text.trim().is_empty() => {
                        AgentResponse::failed(&agent, "empty completion", latency_ms)
                    }
                    Ok(text) => AgentResponse::succeeded(&agent, text, latency_ms),
                    Err(e) => AgentResponse::failed(&agent, e.to_string(), latency_ms),
                }
            });
        }

        let mut responses = BTreeMap::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(response) => {
                    if response.success {
                        debug!(
                            round = round_number,
                            agent = %response.agent_name,
                            latency_ms = response.latency_ms,
                            "agent responded"
                        );
                    } else {
                        warn!(
                            round = round_number,
                            agent = %response.agent_name,
                            error = response.error.as_deref().unwrap_or_default(),
                            "agent failed"
                        );
                    }
                    responses.insert(response.agent_name.clone(), response);
                }
                Err(e) => {
                    warn!(round = round_number, error = %e, "agent worker panicked");
                }
            }
        }

        // A panicked worker leaves no response behind; fill the gap.
        for agent in agents {
            responses
                .entry(agent.name.clone())
                .or_insert_with(|| AgentResponse::failed(agent, "agent worker panicked", 0));
        }

        responses
    }
}

impl std::fmt::Debug for RoundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundExecutor")
            .field("agent_timeout", &self.agent_timeout)
            .field("temperature", &self.temperature)
            .finish()
    }
}
