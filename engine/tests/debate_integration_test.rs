//! Mocked debate integration test: exercises the full debate loop
//! with deterministic mock agents and embeddings (no network calls).
//!
//! Covers: orchestrator ↔ round executor ↔ scorer ↔ similarity ↔ trace
//! running together in a single pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use consensus_engine::{
    AbortReason, Agent, ConvergenceTrace, DebateConfig, DebateOrchestrator, DebatePhase,
    EmbeddingClient, EmbeddingError, EmbeddingPolicy, InferenceClient, InferenceRequest,
    SimilarityConfig, SimilarityEngine, SimilarityMethod, TransportError, UNCLEAR_VOTE,
};

// ── Mocks ──────────────────────────────────────────────────────────

fn round_of(prompt: &str) -> u32 {
    prompt
        .strip_prefix("# DEBATE ROUND ")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Panel of agents keyed by model name.
///
/// `model-<i>` answers `agent-<i> round-<r>` plus a vote (`b` for agent 4,
/// `a` otherwise). `down` always fails, `slow` never answers in time and
/// `json-<label>` answers `{"vote": "<label>"}`. Prompts are recorded.
#[derive(Default)]
struct PanelClient {
    calls: Mutex<HashMap<String, usize>>,
    prompts: Mutex<Vec<String>>,
}

impl PanelClient {
    fn calls_for(&self, model: &str) -> usize {
        self.calls.lock().unwrap().get(model).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl InferenceClient for PanelClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.model.clone())
            .or_insert(0) += 1;
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let round = round_of(&request.prompt);
        let model = request.model.as_str();
        if model == "down" {
            return Err(TransportError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        if model == "slow" {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok("too late".to_string());
        }
        if let Some(label) = model.strip_prefix("json-") {
            return Ok(format!(r#"{{"vote": "{label}"}}"#));
        }
        if model == "mumble" {
            return Ok("It depends on many factors.".to_string());
        }
        let idx = model.strip_prefix("model-").unwrap_or("0");
        let vote = if idx == "4" { "b" } else { "a" };
        Ok(format!("agent-{idx} round-{round}\n\n[VOTE: {vote}]"))
    }
}

/// Builds vectors whose pairwise cosine between different agents equals
/// `agreement(round)`: agent `i` maps to `√a·e0 + √(1−a)·e_i`.
struct GeometricEmbedder {
    agreement: fn(u32) -> f64,
    calls: AtomicUsize,
    fail: bool,
}

impl GeometricEmbedder {
    fn new(agreement: fn(u32) -> f64) -> Self {
        Self {
            agreement,
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            agreement: |_| 0.0,
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingClient for GeometricEmbedder {
    fn model(&self) -> &str {
        "geometric"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::RequestFailed("quota exceeded".to_string()));
        }
        let mut words = text.split_whitespace();
        let agent: usize = words
            .next()
            .and_then(|w| w.strip_prefix("agent-"))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| EmbeddingError::InvalidResponse(format!("unexpected text: {text}")))?;
        let round: u32 = words
            .next()
            .and_then(|w| w.strip_prefix("round-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);

        let a = (self.agreement)(round);
        let mut v = vec![0.0f32; 8];
        v[0] = a.sqrt() as f32;
        v[agent] = (1.0 - a).sqrt() as f32;
        Ok(v)
    }
}

fn panel(models: &[&str]) -> Vec<Agent> {
    models
        .iter()
        .enumerate()
        .map(|(i, model)| Agent::new(format!("agent-{}", i + 1), *model, 256))
        .collect()
}

fn four_agents() -> Vec<Agent> {
    panel(&["model-1", "model-2", "model-3", "model-4"])
}

fn embedding_engine(embedder: Arc<GeometricEmbedder>, policy: EmbeddingPolicy) -> Arc<SimilarityEngine> {
    Arc::new(SimilarityEngine::new(
        embedder,
        SimilarityConfig {
            policy,
            ..Default::default()
        },
    ))
}

fn converge_at_round_four(round: u32) -> f64 {
    if round >= 4 {
        0.9
    } else {
        0.5
    }
}

// ── Convergence (happy path) ───────────────────────────────────────

#[tokio::test]
async fn test_four_agent_debate_converges_at_round_four() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(converge_at_round_four));
    let config = DebateConfig::new("Monolith or microservices?", four_agents())
        .with_rounds(3, 5)
        .with_threshold(0.75);

    let outcome = DebateOrchestrator::new(
        config,
        client.clone(),
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.terminal_phase, DebatePhase::Converged);
    assert_eq!(outcome.rounds_completed, 4);
    assert!(outcome.converged);
    assert!(outcome.stopped_early);
    assert_eq!(outcome.consensual_decision.as_deref(), Some("a"));
    assert_eq!(outcome.final_votes.get("a"), Some(&3));
    assert_eq!(outcome.final_votes.get("b"), Some(&1));
    assert!(outcome.synthesis.is_some());

    // 0.6 · 0.9 + 0.4 · 0.75
    assert!((outcome.final_score - 0.84).abs() < 1e-4);

    let trajectory = outcome.tracer.convergence_trajectory();
    assert_eq!(trajectory.len(), 4);
    for score in &trajectory[..3] {
        // 0.6 · 0.5 + 0.4 · 0.75
        assert!((score - 0.6).abs() < 1e-4);
    }

    for model in ["model-1", "model-2", "model-3", "model-4"] {
        assert_eq!(client.calls_for(model), 4);
    }

    let last = outcome.session.last_round().unwrap();
    let scoring = last.metadata.scoring.as_ref().unwrap();
    assert_eq!(scoring.similarity_method, SimilarityMethod::Embedding);
    assert_eq!(scoring.vote_consensus, 0.75);
}

#[tokio::test]
async fn test_high_score_before_min_rounds_does_not_stop() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(|_| 1.0));
    let config = DebateConfig::new("q", four_agents())
        .with_rounds(3, 5)
        .with_threshold(0.75);

    let outcome = DebateOrchestrator::new(
        config,
        client.clone(),
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.terminal_phase, DebatePhase::Converged);
    assert_eq!(outcome.rounds_completed, 3);
    assert_eq!(client.total_calls(), 12);
}

#[tokio::test]
async fn test_never_converging_debate_exhausts_at_max_rounds() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(|_| 0.2));
    let config = DebateConfig::new("q", four_agents()).with_rounds(2, 4);

    let outcome = DebateOrchestrator::new(
        config,
        client.clone(),
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.terminal_phase, DebatePhase::Exhausted);
    assert_eq!(outcome.rounds_completed, 4);
    assert!(!outcome.converged);
    assert!(!outcome.stopped_early);
    assert!(outcome.synthesis.is_none());
    // Best-effort result still reports the majority.
    assert_eq!(outcome.consensual_decision.as_deref(), Some("a"));
    assert_eq!(client.calls_for("model-1"), 4);
}

// ── Failure handling ───────────────────────────────────────────────

#[tokio::test]
async fn test_total_failure_aborts_after_one_round() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(|_| 1.0));
    let config = DebateConfig::new("q", panel(&["down", "down", "down"]));

    let outcome = DebateOrchestrator::new(
        config,
        client.clone(),
        embedding_engine(embedder.clone(), EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.terminal_phase, DebatePhase::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::NoResponses));
    assert_eq!(outcome.rounds_completed, 1);
    assert_eq!(outcome.final_score, 0.0);
    assert!(outcome.consensual_decision.is_none());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

    let round = &outcome.session.rounds[0];
    assert_eq!(round.responses.len(), 3);
    assert!(round.responses.values().all(|r| !r.success));
    assert!(round.metadata.no_responses);

    let trace = outcome.trace();
    assert_eq!(trace.status, "ABORTED");
    assert_eq!(trace.total_rounds, 1);
}

#[tokio::test]
async fn test_partial_failure_scores_successful_agents_only() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(|_| 1.0));
    let config = DebateConfig::new("q", panel(&["model-1", "model-2", "down"])).with_rounds(1, 2);

    let outcome = DebateOrchestrator::new(
        config,
        client,
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let round = &outcome.session.rounds[0];
    assert_eq!(round.responses.len(), 3);
    assert_eq!(round.success_count(), 2);
    assert_eq!(round.metadata.failed_agents, vec!["agent-3".to_string()]);
    let scoring = round.metadata.scoring.as_ref().unwrap();
    assert_eq!(scoring.total_agents, 2);
    assert_eq!(scoring.vote_consensus, 1.0);

    // 2 of 3 configured agents is a strict majority.
    assert_eq!(outcome.consensual_decision.as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_agent_times_out_without_blocking_others() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(|_| 1.0));
    let mut config = DebateConfig::new("q", panel(&["model-1", "model-2", "slow"])).with_rounds(1, 1);
    config.agent_timeout_ms = 2_000;

    let outcome = DebateOrchestrator::new(
        config,
        client,
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let round = &outcome.session.rounds[0];
    let slow = &round.responses["agent-3"];
    assert!(!slow.success);
    assert!(slow.error.as_deref().unwrap().contains("timed out"));
    assert!(round.responses["agent-1"].success);
    assert!(round.responses["agent-2"].success);
    assert_eq!(round.success_count(), 2);
}

#[tokio::test]
async fn test_strict_embedding_failure_aborts() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::failing());
    let config = DebateConfig::new("q", four_agents());

    let outcome = DebateOrchestrator::new(
        config,
        client,
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.terminal_phase, DebatePhase::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::EmbeddingFailure));
    assert_eq!(outcome.rounds_completed, 1);

    let round = &outcome.session.rounds[0];
    assert_eq!(round.convergence_score, 0.0);
    assert!(round
        .metadata
        .scoring_error
        .as_deref()
        .unwrap()
        .contains("quota exceeded"));
}

#[tokio::test]
async fn test_permissive_embedding_failure_marks_fallback() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::failing());
    let config = DebateConfig::new("q", four_agents()).with_rounds(1, 2);

    let outcome = DebateOrchestrator::new(
        config,
        client,
        embedding_engine(embedder, EmbeddingPolicy::Permissive),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_ne!(outcome.terminal_phase, DebatePhase::Aborted);
    for round in &outcome.session.rounds {
        let scoring = round.metadata.scoring.as_ref().unwrap();
        assert_eq!(scoring.similarity_method, SimilarityMethod::LexicalFallback);
        assert!(scoring
            .embedding_fallback
            .as_deref()
            .unwrap()
            .contains("quota exceeded"));
    }
}

// ── Vote consensus ─────────────────────────────────────────────────

#[tokio::test]
async fn test_three_votes_and_one_unclear_give_three_quarters() {
    let client = Arc::new(PanelClient::default());
    let config = DebateConfig::new("q", panel(&["json-x", "json-x", "json-x", "mumble"]))
        .with_rounds(1, 1);

    let outcome = DebateOrchestrator::new(config, client, Arc::new(SimilarityEngine::lexical()))
        .unwrap()
        .run()
        .await
        .unwrap();

    let round = &outcome.session.rounds[0];
    let scoring = round.metadata.scoring.as_ref().unwrap();
    assert_eq!(scoring.histogram.get("x"), Some(&3));
    assert_eq!(scoring.histogram.get(UNCLEAR_VOTE), Some(&1));
    assert_eq!(scoring.vote_consensus, 0.75);
    assert_eq!(outcome.consensual_decision.as_deref(), Some("x"));
}

// ── Prompts ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_follow_up_rounds_quote_previous_answers() {
    let client = Arc::new(PanelClient::default());
    let embedder = Arc::new(GeometricEmbedder::new(|_| 0.1));
    let config = DebateConfig::new("Which queue?", panel(&["model-1", "down"]))
        .with_context("Team of three")
        .with_rounds(2, 2);

    DebateOrchestrator::new(
        config,
        client.clone(),
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let prompts = client.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 4);
    let opening: Vec<_> = prompts.iter().filter(|p| round_of(p) == 1).collect();
    let follow_up: Vec<_> = prompts.iter().filter(|p| round_of(p) == 2).collect();
    assert_eq!(opening.len(), 2);
    assert_eq!(follow_up.len(), 2);
    assert!(opening[0].contains("Team of three"));
    assert!(follow_up[0].contains("- agent-1: agent-1 round-1"));
    assert!(!follow_up[0].contains("- agent-2:"));
}

// ── Cache and trace ────────────────────────────────────────────────

#[tokio::test]
async fn test_embedding_cache_is_shared_across_debates() {
    let embedder = Arc::new(GeometricEmbedder::new(|_| 0.5));
    let similarity = embedding_engine(embedder.clone(), EmbeddingPolicy::Strict);

    for _ in 0..2 {
        let config = DebateConfig::new("q", four_agents()).with_rounds(1, 1);
        DebateOrchestrator::new(config, Arc::new(PanelClient::default()), similarity.clone())
            .unwrap()
            .run()
            .await
            .unwrap();
    }

    // Identical texts in the second debate come from the cache.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);
    assert_eq!(similarity.cache().stats().hits, 4);
}

#[tokio::test]
async fn test_trace_export_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("debate.json");

    let embedder = Arc::new(GeometricEmbedder::new(converge_at_round_four));
    let mut config = DebateConfig::new("q", four_agents()).with_rounds(3, 5);
    config.debate_id = Some("debate-int-1".to_string());

    let outcome = DebateOrchestrator::new(
        config,
        Arc::new(PanelClient::default()),
        embedding_engine(embedder, EmbeddingPolicy::Strict),
    )
    .unwrap()
    .run()
    .await
    .unwrap();
    outcome.tracer.export_to_path(&path).unwrap();

    let trace = ConvergenceTrace::load_from_path(&path).unwrap();
    assert_eq!(trace.debate_id, "debate-int-1");
    assert_eq!(trace.total_rounds, 4);
    assert_eq!(trace.rounds.len(), 4);
    assert!(trace.converged);
    assert_eq!(trace.status, "CONVERGED");
    assert!((trace.final_score - outcome.final_score).abs() < 1e-9);
    assert_eq!(trace.consensual_decision.as_deref(), Some("a"));
    assert_eq!(trace.majority_vote().as_deref(), Some("a"));
    assert_eq!(trace.rounds[0].agents.len(), 4);
    assert!(trace.summary().contains("Round 4:"));
}

/// Returns a vector with a NaN component for every text.
struct NanEmbedder;

#[async_trait]
impl EmbeddingClient for NanEmbedder {
    fn model(&self) -> &str {
        "nan"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![f32::NAN, 1.0])
    }
}

#[tokio::test]
async fn test_non_finite_embeddings_abort_and_trace_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nan.json");
    let similarity = Arc::new(SimilarityEngine::new(
        Arc::new(NanEmbedder),
        SimilarityConfig::default(),
    ));
    let config = DebateConfig::new("q", panel(&["model-1", "model-2"]));

    let outcome = DebateOrchestrator::new(config, Arc::new(PanelClient::default()), similarity)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.terminal_phase, DebatePhase::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::EmbeddingFailure));
    assert!(outcome.final_score.is_finite());
    assert!(outcome.session.rounds[0]
        .metadata
        .scoring_error
        .as_deref()
        .unwrap()
        .contains("non-finite"));

    outcome.tracer.export_to_path(&path).unwrap();
    let trace = ConvergenceTrace::load_from_path(&path).unwrap();
    assert_eq!(trace.total_rounds, 1);
    assert_eq!(trace.status, "ABORTED");
}
