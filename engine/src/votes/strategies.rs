//! Individual vote extraction strategies.
//!
//! Each strategy either finds a label or returns `None`. A non-match is never
//! an error; the extractor simply moves on to the next strategy.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{normalize_label, VoteStrategy};

/// Keys looked up, in priority order, on a structured (JSON) response.
pub const DEFAULT_VOTE_KEYS: &[&str] = &["vote", "decision", "choice", "option", "recommendation"];

/// Domain vocabulary used when no explicit vote is present.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "sql",
    "nosql",
    "graphdb",
    "mongodb",
    "postgres",
    "microservices",
    "microserviços",
    "monolito",
    "monolith",
    "cloud",
    "on-premise",
    "kubernetes",
    "docker",
    "react",
    "vue",
    "angular",
    "python",
    "javascript",
];

/// Tokens that cancel a keyword appearing shortly after them.
pub const DEFAULT_NEGATIONS: &[&str] = &[
    "not", "no", "never", "avoid", "against", "without", "nor", "don", "dont", "não", "nao",
    "nunca", "sem", "evitar",
];

/// How many preceding tokens are checked for a negation.
pub const DEFAULT_NEGATION_WINDOW: usize = 3;

static MARKUP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\[\s*vot[eo]\s*:\s*([\w-]+)\s*\]",
        r"(?i)\bvot[eo]\b[\s*]*(?::|\bis\b|\bfor\b|\bem\b)[\s*:]*(?:for\s+)?([\w-]+)",
        r"(?i)\bdecision\b\s*\**\s*:[\s*]*([\w-]+)",
        r"(?i)\bdecis(?:ão|ao)\b[\s*:]+([\w-]+)",
        r"(?i)\bchoice\b\s*\**\s*:[\s*]*([\w-]+)",
        r"(?i)\bescolh[ao]\b[\s*:]+([\w-]+)",
        r"(?i)\bop[cç][aã]o\b[\s*:]+([\w-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("vote markup pattern should compile"))
    .collect()
});

// ── Structured ────────────────────────────────────────────────────────

/// Reads the vote from a JSON object embedded in the response.
#[derive(Debug, Clone)]
pub struct StructuredVoteStrategy {
    keys: Vec<String>,
}

impl StructuredVoteStrategy {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn parse_object(text: &str) -> Option<serde_json::Map<String, Value>> {
        let trimmed = text.trim();
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return Some(map);
        }

        // Models often wrap the object in prose or a fenced block.
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end <= start {
            return None;
        }
        match serde_json::from_str::<Value>(&trimmed[start..=end]) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

impl Default for StructuredVoteStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_VOTE_KEYS)
    }
}

impl VoteStrategy for StructuredVoteStrategy {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn extract(&self, text: &str) -> Option<String> {
        let map = Self::parse_object(text)?;
        self.keys.iter().find_map(|key| match map.get(key) {
            Some(Value::String(s)) => normalize_label(s),
            Some(Value::Number(n)) => normalize_label(&n.to_string()),
            Some(Value::Bool(b)) => normalize_label(&b.to_string()),
            _ => None,
        })
    }
}

// ── Markup ────────────────────────────────────────────────────────────

/// Matches explicit vote markup such as `[VOTE: x]`, `vote: x` or `decisão: x`.
#[derive(Debug, Clone, Default)]
pub struct MarkupVoteStrategy;

impl VoteStrategy for MarkupVoteStrategy {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn extract(&self, text: &str) -> Option<String> {
        MARKUP_PATTERNS.iter().find_map(|re| {
            re.captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| normalize_label(m.as_str()))
        })
    }
}

// ── Keyword ───────────────────────────────────────────────────────────

/// Scans for a domain keyword that is not negated just before it.
///
/// Negation detection is purely lexical: "not", "avoid", "não" and friends
/// within the last few tokens cancel a keyword. Sarcasm, double negation and
/// long-range scope are not handled.
#[derive(Debug, Clone)]
pub struct KeywordVoteStrategy {
    keywords: Vec<String>,
    negations: Vec<String>,
    window: usize,
}

impl KeywordVoteStrategy {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            negations: DEFAULT_NEGATIONS.iter().map(|n| n.to_string()).collect(),
            window: DEFAULT_NEGATION_WINDOW,
        }
    }

    pub fn with_negations(mut self, negations: Vec<String>) -> Self {
        self.negations = negations.into_iter().map(|n| n.to_lowercase()).collect();
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    fn is_negated(&self, tokens: &[&str], idx: usize) -> bool {
        let from = idx.saturating_sub(self.window);
        tokens[from..idx]
            .iter()
            .any(|t| self.negations.iter().any(|n| n == t))
    }
}

impl Default for KeywordVoteStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect())
    }
}

impl VoteStrategy for KeywordVoteStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn extract(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .filter(|t| !t.is_empty())
            .collect();

        tokens.iter().enumerate().find_map(|(idx, token)| {
            if self.keywords.iter().any(|k| k == token) && !self.is_negated(&tokens, idx) {
                Some(token.to_string())
            } else {
                None
            }
        })
    }
}
