//! Round state machine: debate phases, validated transitions and the session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::DebateConfig;
use super::round::RoundResult;

/// Where a debate is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebatePhase {
    /// Session created, no round started.
    Initial,
    /// A round is in flight; the number lives on the session.
    Running,
    /// Score reached the threshold after the minimum round count.
    Converged,
    /// Max rounds used without convergence.
    Exhausted,
    /// Stopped because a round could not be scored.
    Aborted,
}

impl DebatePhase {
    /// Converged, Exhausted or Aborted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted | Self::Aborted)
    }

    /// Phases reachable from this one.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Initial => &[Self::Running, Self::Aborted],
            Self::Running => &[
                Self::Running,
                Self::Converged,
                Self::Exhausted,
                Self::Aborted,
            ],
            Self::Converged | Self::Exhausted | Self::Aborted => &[],
        }
    }

    /// Upper-case status label used in traces and summaries.
    pub fn as_status(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Running => "RUNNING",
            Self::Converged => "CONVERGED",
            Self::Exhausted => "EXHAUSTED",
            Self::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Running => write!(f, "running"),
            Self::Converged => write!(f, "converged"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    /// Round number after the transition.
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Refused phase change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// Mutable record of one debate: phase, completed rounds and transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    pub config: DebateConfig,
    pub phase: DebatePhase,
    /// 0 before the first round.
    pub current_round: u32,
    pub rounds: Vec<RoundResult>,
    pub transitions: Vec<DebateTransition>,
    pub started_at: DateTime<Utc>,
}

impl DebateSession {
    pub fn new(id: &str, config: DebateConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
            phase: DebatePhase::Initial,
            current_round: 0,
            rounds: Vec::new(),
            transitions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Move to `to`, logging `reason`. Entering `Running` advances the round
    /// counter and is refused once `max_rounds` has been reached.
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }
        if to == DebatePhase::Running && !self.has_rounds_remaining() {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!("max_rounds ({}) reached", self.config.max_rounds),
            });
        }

        if to == DebatePhase::Running {
            self.current_round += 1;
        }
        self.transitions.push(DebateTransition {
            from: self.phase,
            to,
            round: self.current_round,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    /// Start the debate (Initial → Running, round 1).
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Running, "debate started")
    }

    pub fn record_round(&mut self, round: RoundResult) {
        self.rounds.push(round);
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn has_rounds_remaining(&self) -> bool {
        self.current_round < self.config.max_rounds
    }

    pub fn last_round(&self) -> Option<&RoundResult> {
        self.rounds.last()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | {} rounds recorded | debate={}",
            self.phase,
            self.current_round,
            self.config.max_rounds,
            self.rounds.len(),
            self.id
        )
    }
}
