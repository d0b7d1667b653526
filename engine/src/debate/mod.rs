//! Debate Orchestration: Multi-Agent Convergence Loop
//!
//! Rounds run strictly one after another; inside a round every agent is
//! queried concurrently.
//!
//! # Debate Flow
//!
//! ```text
//! Initial → Running(1) → [score round]
//!              │               │
//!              │               ├─ every agent failed      → Aborted (no_responses)
//!              │               ├─ strict embedding error  → Aborted (embedding_failure)
//!              │               ├─ k ≥ min ∧ score ≥ thr   → Converged
//!              │               ├─ k == max                → Exhausted
//!              └───────────────┴─ otherwise               → Running(k+1)
//! ```

pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod round;
pub mod state;

pub use config::{ConfigError, DebateConfig};
pub use orchestrator::{
    consensual_decision, decide_round, AbortReason, DebateError, DebateOrchestrator,
    DebateOutcome, RoundDecision,
};
pub use round::{AgentResponse, RoundExecutor, RoundMetadata, RoundResult};
pub use state::{DebatePhase, DebateSession, DebateTransition, TransitionError};
