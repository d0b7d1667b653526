//! Convergence trace: append-only round log, JSON export and re-analysis.
//!
//! A [`TraceLogger`] records rounds while a debate runs. [`ConvergenceTrace`]
//! is the exported artifact; it can be written to disk, loaded back and
//! queried without the engine that produced it.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::debate::round::{RoundMetadata, RoundResult};
use crate::debate::state::DebatePhase;
use crate::votes::UNCLEAR_VOTE;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace serialization failed: {0}")]
    Serialize(String),

    #[error("trace deserialization failed: {0}")]
    Deserialize(String),

    #[error("trace I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported trace schema version {found} (max {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Label held by more than half of `agent_count`, `unclear` never counts.
pub fn strict_majority(histogram: &BTreeMap<String, usize>, agent_count: usize) -> Option<String> {
    histogram
        .iter()
        .filter(|(label, _)| label.as_str() != UNCLEAR_VOTE)
        .find(|(_, count)| **count * 2 > agent_count)
        .map(|(label, _)| label.clone())
}

fn round_line(
    round_number: u32,
    score: f64,
    metadata: &RoundMetadata,
    agent_count: usize,
) -> String {
    let Some(scoring) = &metadata.scoring else {
        let why = if metadata.no_responses {
            "no responses".to_string()
        } else {
            metadata
                .scoring_error
                .clone()
                .unwrap_or_else(|| "not scored".to_string())
        };
        return format!("Round {round_number}: score={score:.3} | {why}");
    };

    let majority = match strict_majority(&scoring.histogram, agent_count) {
        Some(label) => {
            let count = scoring.histogram.get(&label).copied().unwrap_or(0);
            format!("{label} ({count}/{agent_count})")
        }
        None => "none".to_string(),
    };
    let mut line = format!(
        "Round {round_number}: score={score:.3} (semantic={:.3} [{}], votes={:.3}) | majority: {majority}",
        scoring.semantic_similarity, scoring.similarity_method, scoring.vote_consensus,
    );
    if !metadata.failed_agents.is_empty() {
        line.push_str(&format!(" | failed: {}", metadata.failed_agents.join(", ")));
    }
    line
}

// ── Export artifact ───────────────────────────────────────────────────

/// One agent entry inside an exported round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceAgent {
    pub name: String,
    pub model: String,
    pub text: String,
    pub success: bool,
    pub error: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRound {
    pub round_number: u32,
    pub timestamp: DateTime<Utc>,
    pub agents: Vec<TraceAgent>,
    pub convergence_score: f64,
    pub metadata: RoundMetadata,
}

impl From<&RoundResult> for TraceRound {
    fn from(round: &RoundResult) -> Self {
        Self {
            round_number: round.round_number,
            timestamp: round.timestamp,
            agents: round
                .responses
                .values()
                .map(|r| TraceAgent {
                    name: r.agent_name.clone(),
                    model: r.model.clone(),
                    text: r.text.clone(),
                    success: r.success,
                    error: r.error.clone(),
                    latency_ms: r.latency_ms,
                })
                .collect(),
            convergence_score: round.convergence_score,
            metadata: round.metadata.clone(),
        }
    }
}

/// Exported record of a debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTrace {
    pub schema_version: u32,
    pub debate_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_rounds: usize,
    pub final_score: f64,
    pub converged: bool,
    /// `CONVERGED`, `EXHAUSTED`, `ABORTED`, or `RUNNING` if exported early.
    pub status: String,
    pub consensual_decision: Option<String>,
    /// Configured agents; the denominator for majority checks.
    pub agent_count: usize,
    pub rounds: Vec<TraceRound>,
}

impl ConvergenceTrace {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn to_json(&self) -> Result<String, TraceError> {
        serde_json::to_string_pretty(self).map_err(|e| TraceError::Serialize(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        let trace: Self =
            serde_json::from_str(json).map_err(|e| TraceError::Deserialize(e.to_string()))?;
        if trace.schema_version > Self::CURRENT_VERSION {
            return Err(TraceError::UnsupportedVersion {
                found: trace.schema_version,
                supported: Self::CURRENT_VERSION,
            });
        }
        Ok(trace)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Write pretty JSON, creating parent directories; overwrites.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| TraceError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_json()?).map_err(io_err)
    }

    pub fn convergence_trajectory(&self) -> Vec<f64> {
        self.rounds.iter().map(|r| r.convergence_score).collect()
    }

    /// Vote histogram of the last round.
    pub fn final_votes(&self) -> BTreeMap<String, usize> {
        self.rounds
            .last()
            .and_then(|r| r.metadata.scoring.as_ref())
            .map(|s| s.histogram.clone())
            .unwrap_or_default()
    }

    pub fn majority_vote(&self) -> Option<String> {
        strict_majority(&self.final_votes(), self.agent_count)
    }

    pub fn summary(&self) -> String {
        if self.rounds.is_empty() {
            return format!("Debate '{}': no rounds recorded", self.debate_id);
        }
        let mut lines = vec![
            format!("Debate ID: {}", self.debate_id),
            format!("Status: {}", self.status),
            format!("Rounds: {}", self.total_rounds),
            format!("Final score: {:.3}", self.final_score),
            format!("Converged: {}", if self.converged { "yes" } else { "no" }),
            format!(
                "Decision: {}",
                self.consensual_decision.as_deref().unwrap_or("none")
            ),
            String::new(),
            "Per-round trajectory:".to_string(),
        ];
        for round in &self.rounds {
            lines.push(format!(
                "  {}",
                round_line(
                    round.round_number,
                    round.convergence_score,
                    &round.metadata,
                    self.agent_count
                )
            ));
        }
        lines.join("\n")
    }
}

// ── Logger ────────────────────────────────────────────────────────────

/// Append-only log of a running debate.
#[derive(Debug, Clone)]
pub struct TraceLogger {
    debate_id: String,
    agent_count: usize,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: Option<DebatePhase>,
    consensual_decision: Option<String>,
    rounds: Vec<RoundResult>,
}

impl TraceLogger {
    pub fn new(debate_id: &str, agent_count: usize) -> Self {
        Self {
            debate_id: debate_id.to_string(),
            agent_count,
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            consensual_decision: None,
            rounds: Vec::new(),
        }
    }

    pub fn debate_id(&self) -> &str {
        &self.debate_id
    }

    pub fn rounds(&self) -> &[RoundResult] {
        &self.rounds
    }

    /// Append exactly one round.
    pub fn log_round(&mut self, round: RoundResult) {
        self.rounds.push(round);
    }

    /// Stamp the terminal status.
    pub fn finish(&mut self, status: DebatePhase, consensual_decision: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.status = Some(status);
        self.consensual_decision = consensual_decision;
    }

    pub fn export(&self) -> ConvergenceTrace {
        let status = self.status.unwrap_or(DebatePhase::Running);
        ConvergenceTrace {
            schema_version: ConvergenceTrace::CURRENT_VERSION,
            debate_id: self.debate_id.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            total_rounds: self.rounds.len(),
            final_score: self.rounds.last().map_or(0.0, |r| r.convergence_score),
            converged: status == DebatePhase::Converged,
            status: status.as_status().to_string(),
            consensual_decision: self.consensual_decision.clone(),
            agent_count: self.agent_count,
            rounds: self.rounds.iter().map(TraceRound::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, TraceError> {
        self.export().to_json()
    }

    pub fn export_to_path(&self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        let path = path.as_ref();
        self.export().write_to_path(path)?;
        info!(debate_id = %self.debate_id, path = %path.display(), "trace exported");
        Ok(())
    }

    pub fn convergence_trajectory(&self) -> Vec<f64> {
        self.rounds.iter().map(|r| r.convergence_score).collect()
    }

    pub fn final_votes(&self) -> BTreeMap<String, usize> {
        self.rounds.last().map(|r| r.histogram()).unwrap_or_default()
    }

    pub fn majority_vote(&self) -> Option<String> {
        strict_majority(&self.final_votes(), self.agent_count)
    }

    pub fn summary(&self) -> String {
        self.export().summary()
    }
}
