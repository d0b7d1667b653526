//! Convergence scoring: one number in `[0, 1]` per round.
//!
//! `score = semantic_weight · similarity + vote_weight · vote_consensus`,
//! clamped. Every input that went into the number is kept in
//! [`ScoreMetadata`] so a round can be audited after the fact.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::similarity::{SimilarityEngine, SimilarityError, SimilarityMethod};
use crate::votes::{VoteExtractor, UNCLEAR_VOTE};

pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.6;
pub const DEFAULT_VOTE_WEIGHT: f64 = 0.4;
/// Consensus assumed when no agent cast a recognisable vote.
pub const DEFAULT_NO_VOTE_CONSENSUS: f64 = 0.3;

/// Whether the `unclear` sentinel may win the consensus count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclearPolicy {
    /// `unclear` never counts as agreement.
    #[default]
    Exclude,
    /// `unclear` competes like any other label.
    Include,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub semantic_weight: f64,
    pub vote_weight: f64,
    pub no_vote_consensus: f64,
    pub unclear_policy: UnclearPolicy,
    /// Domain vocabulary for keyword votes; empty uses the built-in list.
    pub keywords: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            vote_weight: DEFAULT_VOTE_WEIGHT,
            no_vote_consensus: DEFAULT_NO_VOTE_CONSENSUS,
            unclear_policy: UnclearPolicy::default(),
            keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub semantic: f64,
    pub vote: f64,
}

/// Everything that produced a round's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub semantic_similarity: f64,
    pub similarity_method: SimilarityMethod,
    /// Reason the embedding measure was replaced, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_fallback: Option<String>,
    pub vote_consensus: f64,
    /// agent name → vote label
    pub votes: BTreeMap<String, String>,
    /// vote label → count, `unclear` included
    pub histogram: BTreeMap<String, usize>,
    pub weights: ScoreWeights,
    pub total_agents: usize,
    pub final_score: f64,
}

/// Count labels, `unclear` included.
pub fn vote_histogram<'a>(votes: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for label in votes {
        *histogram.entry(label.clone()).or_insert(0) += 1;
    }
    histogram
}

/// Share of agents behind the most popular counted label.
pub fn vote_consensus(
    histogram: &BTreeMap<String, usize>,
    total_agents: usize,
    config: &ScoringConfig,
) -> f64 {
    if total_agents == 0 {
        return config.no_vote_consensus;
    }
    let top = histogram
        .iter()
        .filter(|(label, _)| {
            config.unclear_policy == UnclearPolicy::Include || label.as_str() != UNCLEAR_VOTE
        })
        .map(|(_, count)| *count)
        .max();
    match top {
        Some(count) if count > 0 => count as f64 / total_agents as f64,
        _ => config.no_vote_consensus,
    }
}

/// Weighted sum of the two signals, clamped to `[0, 1]`.
pub fn combine(similarity: f64, consensus: f64, weights: ScoreWeights) -> f64 {
    (weights.semantic * similarity + weights.vote * consensus).clamp(0.0, 1.0)
}

/// Combines text similarity and vote agreement for one round.
#[derive(Debug)]
pub struct ConvergenceScorer {
    config: ScoringConfig,
    extractor: VoteExtractor,
    similarity: Arc<SimilarityEngine>,
}

impl ConvergenceScorer {
    pub fn new(config: ScoringConfig, similarity: Arc<SimilarityEngine>) -> Self {
        let extractor = if config.keywords.is_empty() {
            VoteExtractor::new()
        } else {
            VoteExtractor::with_keywords(config.keywords.clone())
        };
        Self {
            config,
            extractor,
            similarity,
        }
    }

    pub fn with_extractor(mut self, extractor: VoteExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn extractor(&self) -> &VoteExtractor {
        &self.extractor
    }

    pub fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            semantic: self.config.semantic_weight,
            vote: self.config.vote_weight,
        }
    }

    /// Score `(agent name, text)` pairs. Only similarity can fail.
    pub async fn score(&self, texts: &[(&str, &str)]) -> Result<ScoreMetadata, SimilarityError> {
        let bodies: Vec<&str> = texts.iter().map(|(_, text)| *text).collect();
        let report = self.similarity.compute(&bodies).await?;

        let votes: BTreeMap<String, String> = texts
            .iter()
            .map(|(agent, text)| (agent.to_string(), self.extractor.extract(text)))
            .collect();
        let histogram = vote_histogram(votes.values());
        let total_agents = texts.len();
        let consensus = vote_consensus(&histogram, total_agents, &self.config);

        let weights = self.weights();
        let final_score = combine(report.similarity, consensus, weights);

        debug!(
            similarity = report.similarity,
            method = %report.method,
            consensus,
            final_score,
            "round scored"
        );

        Ok(ScoreMetadata {
            semantic_similarity: report.similarity,
            similarity_method: report.method,
            embedding_fallback: report.fallback_reason,
            vote_consensus: consensus,
            votes,
            histogram,
            weights,
            total_agents,
            final_score,
        })
    }
}
