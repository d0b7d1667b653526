//! Multi-Agent Consensus Engine
//!
//! Runs structured debate rounds across several independently-queried
//! language-model agents and decides, from a quantitative convergence score,
//! whether they agree.
//!
//! # Components
//!
//! - [`agent`]: agent identities and the injected [`InferenceClient`]
//! - [`votes`]: free-form text → short vote label (or `"unclear"`)
//! - [`similarity`]: mean pairwise semantic similarity with a bounded cache
//! - [`scoring`]: weighted combination of similarity and vote consensus
//! - [`debate`]: round execution, state machine and orchestration
//! - [`trace`]: append-only round log, JSON export and re-analysis
//!
//! # Usage
//!
//! ```ignore
//! let config = DebateConfig::new("Monolith or microservices?", agents);
//! let similarity = Arc::new(SimilarityEngine::new(embedder, SimilarityConfig::default()));
//! let outcome = DebateOrchestrator::new(config, client, similarity)?.run().await?;
//! println!("{}", outcome.summary_line());
//! outcome.tracer.export_to_path("logs/debate.json")?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod debate;
pub mod scoring;
pub mod similarity;
pub mod trace;
pub mod votes;

// Re-export agent boundary types
pub use agent::{Agent, InferenceClient, InferenceRequest, TransportError};

// Re-export vote extraction types
pub use votes::{VoteExtractor, VoteMatch, VoteStrategy, UNCLEAR_VOTE};

// Re-export similarity types
pub use similarity::{
    EmbeddingCache, EmbeddingClient, EmbeddingError, EmbeddingPolicy, SimilarityConfig,
    SimilarityEngine, SimilarityError, SimilarityMethod, SimilarityReport,
};

// Re-export scoring types
pub use scoring::{ConvergenceScorer, ScoreMetadata, ScoreWeights, ScoringConfig, UnclearPolicy};

// Re-export debate types
pub use debate::{
    decide_round, AbortReason, AgentResponse, ConfigError, DebateConfig, DebateError,
    DebateOrchestrator, DebateOutcome, DebatePhase, DebateSession, RoundDecision, RoundExecutor,
    RoundMetadata, RoundResult, TransitionError,
};

// Re-export trace types
pub use trace::{ConvergenceTrace, TraceError, TraceLogger};
