//! Debate orchestrator: drives rounds until convergence or exhaustion.
//!
//! Ties together the state machine, the round executor and the trace
//! logger. The per-round decision is the pure function [`decide_round`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::{ConfigError, DebateConfig};
use super::prompts;
use super::round::{RoundExecutor, RoundResult};
use super::state::{DebatePhase, DebateSession, TransitionError};
use crate::agent::InferenceClient;
use crate::scoring::ConvergenceScorer;
use crate::similarity::SimilarityEngine;
use crate::trace::{ConvergenceTrace, TraceLogger};
use crate::votes::UNCLEAR_VOTE;

/// Why a debate was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Every agent failed in a round.
    NoResponses,
    /// Strict embedding policy and the backend failed.
    EmbeddingFailure,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResponses => write!(f, "no_responses"),
            Self::EmbeddingFailure => write!(f, "embedding_failure"),
        }
    }
}

/// What to do after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDecision {
    Continue,
    Converged,
    Exhausted,
    Aborted(AbortReason),
}

/// Decide the next step from one finished round.
///
/// Order: total failure, scoring failure, convergence (only from
/// `min_rounds` on), round cap, otherwise continue.
pub fn decide_round(round: &RoundResult, config: &DebateConfig) -> RoundDecision {
    if round.all_failed() {
        return RoundDecision::Aborted(AbortReason::NoResponses);
    }
    if round.is_scoring_failure() {
        return RoundDecision::Aborted(AbortReason::EmbeddingFailure);
    }
    if round.round_number >= config.min_rounds && round.convergence_score >= config.threshold {
        return RoundDecision::Converged;
    }
    if round.round_number >= config.max_rounds {
        return RoundDecision::Exhausted;
    }
    RoundDecision::Continue
}

/// Label backed by a strict majority of the configured agents.
pub fn consensual_decision(histogram: &BTreeMap<String, usize>, agent_count: usize) -> Option<String> {
    let (label, count) = histogram
        .iter()
        .filter(|(label, _)| label.as_str() != UNCLEAR_VOTE)
        .max_by_key(|(_, count)| **count)?;
    if *count * 2 > agent_count {
        Some(label.clone())
    } else {
        None
    }
}

/// Error from the debate orchestrator.
#[derive(Debug, Error)]
pub enum DebateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transition failed: {0}")]
    Transition(#[from] TransitionError),
}

/// Outcome of a completed debate.
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub debate_id: String,
    /// Converged, Exhausted or Aborted.
    pub terminal_phase: DebatePhase,
    pub rounds_completed: u32,
    /// Score of the last round (0.0 if it was not scored).
    pub final_score: f64,
    pub converged: bool,
    /// Strict-majority label; never set on abort.
    pub consensual_decision: Option<String>,
    /// Histogram of the last round.
    pub final_votes: BTreeMap<String, usize>,
    /// Excerpts of the final responses; only on convergence.
    pub synthesis: Option<String>,
    /// Converged before `max_rounds`.
    pub stopped_early: bool,
    pub abort_reason: Option<AbortReason>,
    pub session: DebateSession,
    pub tracer: TraceLogger,
}

impl DebateOutcome {
    pub fn is_success(&self) -> bool {
        self.terminal_phase == DebatePhase::Converged
    }

    pub fn trace(&self) -> ConvergenceTrace {
        self.tracer.export()
    }

    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "[{}] {} rounds | score={:.3} | decision={} | debate={}",
            self.terminal_phase.as_status(),
            self.rounds_completed,
            self.final_score,
            self.consensual_decision.as_deref().unwrap_or("none"),
            self.debate_id
        );
        if let Some(reason) = self.abort_reason {
            line.push_str(&format!(" | reason={reason}"));
        }
        line
    }
}

/// Runs one debate to a terminal phase.
///
/// Usage:
/// 1. Build with `new()`; the config is validated before any agent call
/// 2. Call `run()` and inspect the returned [`DebateOutcome`]
pub struct DebateOrchestrator {
    config: DebateConfig,
    session: DebateSession,
    executor: RoundExecutor,
    tracer: TraceLogger,
}

impl DebateOrchestrator {
    pub fn new(
        config: DebateConfig,
        client: Arc<dyn InferenceClient>,
        similarity: Arc<SimilarityEngine>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let debate_id = config
            .debate_id
            .clone()
            .unwrap_or_else(|| format!("debate-{}", Uuid::new_v4()));
        let scorer = Arc::new(ConvergenceScorer::new(config.scoring.clone(), similarity));
        let executor = RoundExecutor::new(
            client,
            scorer,
            config.agent_timeout(),
            config.temperature,
            &config.system_prompt,
        );
        let tracer = TraceLogger::new(&debate_id, config.agents.len());
        let session = DebateSession::new(&debate_id, config.clone());

        Ok(Self {
            config,
            session,
            executor,
            tracer,
        })
    }

    pub fn debate_id(&self) -> &str {
        &self.session.id
    }

    pub fn session(&self) -> &DebateSession {
        &self.session
    }

    /// Run rounds until a terminal phase.
    pub async fn run(mut self) -> Result<DebateOutcome, DebateError> {
        self.session.start()?;
        info!(
            debate_id = %self.session.id,
            agents = self.config.agents.len(),
            min_rounds = self.config.min_rounds,
            max_rounds = self.config.max_rounds,
            threshold = self.config.threshold,
            "debate started"
        );

        let mut abort_reason = None;
        loop {
            let round_number = self.session.current_round;
            let prompt = prompts::round_prompt(
                &self.config.question,
                &self.config.context,
                round_number,
                self.session.last_round(),
            );

            let round = self
                .executor
                .execute(round_number, &self.config.agents, &prompt)
                .await;
            let decision = decide_round(&round, &self.config);
            let score = round.convergence_score;
            self.session.record_round(round.clone());
            self.tracer.log_round(round);

            match decision {
                RoundDecision::Continue => {
                    let reason = if round_number < self.config.min_rounds {
                        "min_rounds not reached".to_string()
                    } else {
                        format!("score {score:.3} below threshold {:.3}", self.config.threshold)
                    };
                    self.session.transition(DebatePhase::Running, &reason)?;
                }
                RoundDecision::Converged => {
                    info!(debate_id = %self.session.id, round = round_number, score, "debate converged");
                    self.session.transition(
                        DebatePhase::Converged,
                        &format!("score {score:.3} >= threshold {:.3}", self.config.threshold),
                    )?;
                    break;
                }
                RoundDecision::Exhausted => {
                    info!(debate_id = %self.session.id, round = round_number, score, "max rounds reached without convergence");
                    self.session
                        .transition(DebatePhase::Exhausted, "max_rounds reached")?;
                    break;
                }
                RoundDecision::Aborted(reason) => {
                    warn!(debate_id = %self.session.id, round = round_number, %reason, "debate aborted");
                    self.session
                        .transition(DebatePhase::Aborted, &reason.to_string())?;
                    abort_reason = Some(reason);
                    break;
                }
            }
        }

        Ok(self.into_outcome(abort_reason))
    }

    fn into_outcome(mut self, abort_reason: Option<AbortReason>) -> DebateOutcome {
        let phase = self.session.phase;
        let last = self.session.last_round();
        let final_score = last.map_or(0.0, |r| r.convergence_score);
        let final_votes = last.map(|r| r.histogram()).unwrap_or_default();

        let consensual = match phase {
            DebatePhase::Converged | DebatePhase::Exhausted => {
                consensual_decision(&final_votes, self.config.agents.len())
            }
            _ => None,
        };
        let synthesis = match (phase, last) {
            (DebatePhase::Converged, Some(round)) => {
                Some(prompts::synthesize(round, "convergence score"))
            }
            _ => None,
        };
        let converged = phase == DebatePhase::Converged;
        let stopped_early = converged && self.session.current_round < self.config.max_rounds;

        self.tracer.finish(phase, consensual.clone());

        let outcome = DebateOutcome {
            debate_id: self.session.id.clone(),
            terminal_phase: phase,
            rounds_completed: self.session.current_round,
            final_score,
            converged,
            consensual_decision: consensual,
            final_votes,
            synthesis,
            stopped_early,
            abort_reason,
            session: self.session,
            tracer: self.tracer,
        };
        info!(summary = %outcome.summary_line(), "debate finished");
        outcome
    }
}
