//! Wiring between a [`RunnerConfig`] and the engine, plus text rendering
//! for the `run` and `inspect` commands.

use std::fmt::Write as _;
use std::sync::Arc;

use consensus_engine::{
    ConvergenceTrace, DebateError, DebateOrchestrator, DebateOutcome, EmbeddingClient,
    EmbeddingPolicy, InferenceClient, SimilarityEngine,
};
use thiserror::Error;

use crate::config::{ConfigFileError, RunnerConfig};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigFileError),

    #[error(transparent)]
    Debate(#[from] DebateError),
}

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub question: Option<String>,
    pub context: Option<String>,
    /// Force the strict embedding policy.
    pub strict: bool,
    /// Skip the embedding backend entirely.
    pub lexical_only: bool,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(question) = &self.question {
            config.debate.question = question.clone();
        }
        if let Some(context) = &self.context {
            config.debate.context = context.clone();
        }
        if self.strict {
            config.similarity.policy = EmbeddingPolicy::Strict;
        }
    }
}

/// Similarity engine for a run; `lexical_only` ignores `embedder`.
pub fn similarity_engine(
    config: &RunnerConfig,
    embedder: Arc<dyn EmbeddingClient>,
    lexical_only: bool,
) -> SimilarityEngine {
    if lexical_only {
        SimilarityEngine::lexical()
    } else {
        SimilarityEngine::new(embedder, config.similarity.clone())
    }
}

/// Validate `config` and run one debate to a terminal phase.
pub async fn run_debate(
    config: &RunnerConfig,
    client: Arc<dyn InferenceClient>,
    similarity: Arc<SimilarityEngine>,
) -> Result<DebateOutcome, RunError> {
    let debate = config.validated()?;
    let orchestrator = DebateOrchestrator::new(debate, client, similarity)
        .map_err(ConfigFileError::from)?;
    Ok(orchestrator.run().await?)
}

/// Human-readable report printed after `run`.
pub fn render_outcome(outcome: &DebateOutcome) -> String {
    let trace = outcome.trace();
    let mut out = String::new();
    let _ = writeln!(out, "{}", outcome.summary_line());
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", trace.summary());
    if outcome.stopped_early {
        let _ = writeln!(
            out,
            "\nStopped early after {} rounds.",
            outcome.rounds_completed
        );
    }
    if let Some(synthesis) = &outcome.synthesis {
        let _ = writeln!(out, "\n{synthesis}");
    }
    out
}

/// Standalone re-analysis of a saved trace.
pub fn render_inspection(trace: &ConvergenceTrace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", trace.summary());

    let trajectory: Vec<String> = trace
        .convergence_trajectory()
        .iter()
        .map(|s| format!("{s:.3}"))
        .collect();
    let _ = writeln!(out, "\nTrajectory: [{}]", trajectory.join(", "));

    let votes = trace.final_votes();
    if votes.is_empty() {
        let _ = writeln!(out, "Final votes: none");
    } else {
        let rendered: Vec<String> = votes.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let _ = writeln!(out, "Final votes: {}", rendered.join(", "));
    }
    let _ = writeln!(
        out,
        "Majority: {}",
        trace.majority_vote().as_deref().unwrap_or("none")
    );
    out
}
