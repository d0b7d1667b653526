//! Similarity engine: how semantically close a round's texts are.
//!
//! Mean pairwise cosine similarity of embedding vectors, with a token-set
//! Jaccard measure as the lexical alternative. Which one produced a value is
//! always reported in the [`SimilarityReport`]; a fallback is never silent.
//!
//! ```text
//! texts ──► < 2 texts ──────────────────────────► 1.0 (trivial)
//!       └─► embeddings (cached, concurrent) ──ok─► mean cosine (embedding)
//!                                          └─err─► Strict:     SimilarityError
//!                                                  Permissive: Jaccard (lexical_fallback)
//! ```

pub mod cache;
pub mod lexical;

pub use cache::{CacheStats, EmbeddingCache, DEFAULT_CACHE_CAPACITY, DEFAULT_KEY_CHARS};
pub use lexical::{jaccard, mean_pairwise_jaccard};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Failure of the injected embedding backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),

    #[error("embedding response malformed: {0}")]
    InvalidResponse(String),
}

/// Injected capability that maps text to a vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier; part of every cache key.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("embedding backend failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding dimensions differ ({left} vs {right})")]
    DimensionMismatch { left: usize, right: usize },

    #[error("similarity is not a finite number")]
    NonFinite,
}

/// What to do when the embedding backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPolicy {
    /// Propagate the failure to the caller.
    #[default]
    Strict,
    /// Substitute the lexical measure and mark the result.
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    /// Fewer than two texts.
    Trivial,
    Embedding,
    /// No embedding backend configured.
    Lexical,
    /// Embedding backend failed; permissive policy applied.
    LexicalFallback,
}

impl std::fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trivial => "trivial",
            Self::Embedding => "embedding",
            Self::Lexical => "lexical",
            Self::LexicalFallback => "lexical_fallback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// Mean pairwise similarity in `[0, 1]`.
    pub similarity: f64,
    pub method: SimilarityMethod,
    /// Set only for [`SimilarityMethod::LexicalFallback`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl SimilarityReport {
    fn trivial() -> Self {
        Self {
            similarity: 1.0,
            method: SimilarityMethod::Trivial,
            fallback_reason: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.method == SimilarityMethod::LexicalFallback
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub policy: EmbeddingPolicy,
    pub cache_capacity: usize,
    pub cache_key_chars: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            policy: EmbeddingPolicy::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_key_chars: DEFAULT_KEY_CHARS,
        }
    }
}

/// Cosine similarity of two vectors; 0 when either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Mean cosine similarity over every unordered pair, clamped to `[0, 1]`.
pub fn mean_pairwise_cosine<V: AsRef<[f32]>>(vectors: &[V]) -> Result<f64, SimilarityError> {
    if vectors.len() < 2 {
        return Ok(1.0);
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            let (a, b) = (vectors[i].as_ref(), vectors[j].as_ref());
            if a.len() != b.len() {
                return Err(SimilarityError::DimensionMismatch {
                    left: a.len(),
                    right: b.len(),
                });
            }
            total += cosine_similarity(a, b);
            pairs += 1;
        }
    }
    let mean = total / pairs as f64;
    if !mean.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    Ok(mean.clamp(0.0, 1.0))
}

/// Computes round similarity and owns the embedding cache.
///
/// Share one engine (behind an `Arc`) across debates to share the cache.
pub struct SimilarityEngine {
    embedder: Option<Arc<dyn EmbeddingClient>>,
    config: SimilarityConfig,
    cache: EmbeddingCache,
}

impl SimilarityEngine {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, config: SimilarityConfig) -> Self {
        let cache = EmbeddingCache::new(config.cache_capacity, config.cache_key_chars);
        Self {
            embedder: Some(embedder),
            config,
            cache,
        }
    }

    /// Engine with no embedding backend; every report uses the lexical measure.
    pub fn lexical() -> Self {
        let config = SimilarityConfig::default();
        let cache = EmbeddingCache::new(0, config.cache_key_chars);
        Self {
            embedder: None,
            config,
            cache,
        }
    }

    pub fn policy(&self) -> EmbeddingPolicy {
        self.config.policy
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Mean pairwise similarity of `texts`.
    pub async fn compute(&self, texts: &[&str]) -> Result<SimilarityReport, SimilarityError> {
        if texts.len() < 2 {
            return Ok(SimilarityReport::trivial());
        }

        let Some(embedder) = &self.embedder else {
            return Ok(SimilarityReport {
                similarity: mean_pairwise_jaccard(texts),
                method: SimilarityMethod::Lexical,
                fallback_reason: None,
            });
        };

        match self.embedding_similarity(embedder.as_ref(), texts).await {
            Ok(similarity) => Ok(SimilarityReport {
                similarity,
                method: SimilarityMethod::Embedding,
                fallback_reason: None,
            }),
            Err(e) => match self.config.policy {
                EmbeddingPolicy::Strict => {
                    error!(model = embedder.model(), error = %e, "embedding similarity failed");
                    Err(e)
                }
                EmbeddingPolicy::Permissive => {
                    warn!(
                        model = embedder.model(),
                        error = %e,
                        "embedding similarity failed, using lexical fallback"
                    );
                    Ok(SimilarityReport {
                        similarity: mean_pairwise_jaccard(texts),
                        method: SimilarityMethod::LexicalFallback,
                        fallback_reason: Some(e.to_string()),
                    })
                }
            },
        }
    }

    async fn embedding_similarity(
        &self,
        embedder: &dyn EmbeddingClient,
        texts: &[&str],
    ) -> Result<f64, SimilarityError> {
        let vectors =
            try_join_all(texts.iter().map(|text| self.embed_cached(embedder, text))).await?;
        let slices: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        mean_pairwise_cosine(&slices)
    }

    async fn embed_cached(
        &self,
        embedder: &dyn EmbeddingClient,
        text: &str,
    ) -> Result<Arc<Vec<f32>>, SimilarityError> {
        let model = embedder.model();
        if let Some(hit) = self.cache.get(model, text) {
            debug!(model, "embedding cache hit");
            return Ok(hit);
        }
        let vector = embedder.embed(text).await?;
        if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "non-finite component at index {pos}"
            ))
            .into());
        }
        let vector = Arc::new(vector);
        self.cache.insert(model, text, Arc::clone(&vector));
        Ok(vector)
    }
}

impl std::fmt::Debug for SimilarityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityEngine")
            .field("embedder", &self.embedder.as_ref().map(|e| e.model().to_string()))
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}
