//! Command-line runner for the consensus engine.
//!
//! Loads a TOML configuration, wires the engine to an OpenAI-compatible
//! backend and renders debate outcomes and saved traces.

pub mod config;
pub mod providers;
pub mod run;
pub mod telemetry;

pub use config::{ConfigFileError, ProviderConfig, RunnerConfig};
pub use providers::{OpenAiCompatClient, ProviderError};
pub use run::{render_inspection, render_outcome, run_debate, RunError, RunOverrides};
pub use telemetry::{init_tracing, LogFormat};
