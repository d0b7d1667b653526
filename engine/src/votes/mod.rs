//! Vote extraction: turns free-form agent text into a short label.
//!
//! Strategies run in a fixed order and the first one that finds a label
//! wins:
//!
//! ```text
//! structured (JSON keys) → markup ([VOTE: x], vote: x, decisão: x)
//!     → keyword vocabulary (negation-aware) → "unclear"
//! ```
//!
//! Extraction never fails. Unparseable text degrades to [`UNCLEAR_VOTE`].

pub mod strategies;

pub use strategies::{KeywordVoteStrategy, MarkupVoteStrategy, StructuredVoteStrategy};

use tracing::debug;

/// Sentinel label for responses where no vote could be found.
pub const UNCLEAR_VOTE: &str = "unclear";

/// A single extraction strategy.
pub trait VoteStrategy: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Return a normalized label, or `None` when this strategy does not apply.
    fn extract(&self, text: &str) -> Option<String>;
}

/// Normalize a raw label: trim, strip surrounding punctuation, lowercase.
pub fn normalize_label(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Label plus the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMatch {
    pub label: String,
    /// `None` when the result is the unclear sentinel.
    pub strategy: Option<&'static str>,
}

impl VoteMatch {
    pub fn is_unclear(&self) -> bool {
        self.strategy.is_none()
    }
}

/// Ordered cascade of [`VoteStrategy`] implementations.
pub struct VoteExtractor {
    strategies: Vec<Box<dyn VoteStrategy>>,
}

impl VoteExtractor {
    /// Default cascade with the built-in keyword vocabulary.
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(StructuredVoteStrategy::default()),
            Box::new(MarkupVoteStrategy),
            Box::new(KeywordVoteStrategy::default()),
        ])
    }

    /// Default cascade with a caller-supplied domain vocabulary.
    pub fn with_keywords(keywords: Vec<String>) -> Self {
        Self::with_strategies(vec![
            Box::new(StructuredVoteStrategy::default()),
            Box::new(MarkupVoteStrategy),
            Box::new(KeywordVoteStrategy::new(keywords)),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn VoteStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies in evaluation order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extract a label, falling back to [`UNCLEAR_VOTE`].
    pub fn extract(&self, text: &str) -> String {
        self.extract_match(text).label
    }

    /// Extract a label and report which strategy matched.
    pub fn extract_match(&self, text: &str) -> VoteMatch {
        for strategy in &self.strategies {
            if let Some(label) = strategy.extract(text) {
                debug!(strategy = strategy.name(), label = %label, "vote extracted");
                return VoteMatch {
                    label,
                    strategy: Some(strategy.name()),
                };
            }
        }
        VoteMatch {
            label: UNCLEAR_VOTE.to_string(),
            strategy: None,
        }
    }
}

impl Default for VoteExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VoteExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteExtractor")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
