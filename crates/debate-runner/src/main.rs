use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use consensus_engine::ConvergenceTrace;
use debate_runner::run::similarity_engine;
use debate_runner::{
    init_tracing, render_inspection, render_outcome, run_debate, LogFormat, OpenAiCompatClient,
    RunOverrides, RunnerConfig,
};
use tracing::info;

/// Run multi-agent consensus debates against OpenAI-compatible endpoints
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a debate and write its trace
    Run {
        /// Runner configuration file
        #[arg(short, long, env = "DEBATE_CONFIG")]
        config: PathBuf,

        /// Question to debate (overrides [debate].question)
        #[arg(short, long)]
        question: Option<String>,

        /// Background context (overrides [debate].context)
        #[arg(long)]
        context: Option<String>,

        /// Where to write the JSON trace
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Abort on embedding failure instead of falling back to lexical similarity
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Score similarity lexically without calling the embedding endpoint
        #[arg(long, default_value_t = false)]
        lexical_only: bool,
    },

    /// Re-analyse a saved trace
    Inspect {
        /// Trace JSON written by `run`
        trace: PathBuf,

        /// Exit non-zero unless the debate converged
        #[arg(long, default_value_t = false)]
        require_converged: bool,
    },

    /// Write the default configuration file
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Validate a configuration file without contacting any backend
    CheckConfig {
        #[arg(short, long, env = "DEBATE_CONFIG")]
        config: PathBuf,

        /// Question to validate with (overrides [debate].question)
        #[arg(short, long)]
        question: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    match args.command {
        Command::Run {
            config,
            question,
            context,
            output,
            strict,
            lexical_only,
        } => {
            let overrides = RunOverrides {
                question,
                context,
                strict,
                lexical_only,
            };
            cmd_run(config, overrides, output).await
        }
        Command::Inspect {
            trace,
            require_converged,
        } => cmd_inspect(trace, require_converged),
        Command::InitConfig { path, force } => cmd_init_config(path, force),
        Command::CheckConfig { config, question } => cmd_check_config(config, question),
    }
}

fn load_config(path: &Path, overrides: &RunOverrides) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    config.apply_env();
    overrides.apply(&mut config);
    Ok(config)
}

async fn cmd_run(path: PathBuf, overrides: RunOverrides, output: Option<PathBuf>) -> Result<()> {
    let config = load_config(&path, &overrides)?;
    let client = Arc::new(
        OpenAiCompatClient::from_config(&config.provider)
            .context("Failed to build provider client")?,
    );
    let similarity = Arc::new(similarity_engine(
        &config,
        client.clone(),
        overrides.lexical_only,
    ));

    info!(
        base_url = %config.provider.base_url,
        agents = config.agents.len(),
        lexical_only = overrides.lexical_only,
        "Starting debate"
    );
    let outcome = run_debate(&config, client, similarity)
        .await
        .context("Debate failed")?;

    print!("{}", render_outcome(&outcome));

    let output = output.unwrap_or_else(|| {
        PathBuf::from("logs").join(format!("{}.json", outcome.debate_id))
    });
    outcome
        .tracer
        .export_to_path(&output)
        .with_context(|| format!("Failed to write trace {}", output.display()))?;
    info!(path = %output.display(), "Trace written");
    Ok(())
}

fn cmd_inspect(path: PathBuf, require_converged: bool) -> Result<()> {
    let trace = ConvergenceTrace::load_from_path(&path)
        .with_context(|| format!("Failed to load trace {}", path.display()))?;
    print!("{}", render_inspection(&trace));
    if require_converged && !trace.converged {
        bail!("debate {} did not converge ({})", trace.debate_id, trace.status);
    }
    Ok(())
}

fn cmd_init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    RunnerConfig::write_default(&path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn cmd_check_config(path: PathBuf, question: Option<String>) -> Result<()> {
    let overrides = RunOverrides {
        question,
        ..Default::default()
    };
    let config = load_config(&path, &overrides)?;
    let debate = config.validated().context("Invalid configuration")?;
    println!(
        "OK: {} agents, rounds {}..={}, threshold {:.2}, similarity policy {:?}",
        debate.agents.len(),
        debate.min_rounds,
        debate.max_rounds,
        debate.threshold,
        config.similarity.policy
    );
    Ok(())
}
