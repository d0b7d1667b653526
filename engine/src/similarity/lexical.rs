//! Lexical overlap: token-set Jaccard similarity.
//!
//! Used when no embedding backend is configured, or as the marked fallback
//! in permissive mode.

use std::collections::HashSet;

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Jaccard index of two token sets; two empty sets score 0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left = token_set(a);
    let right = token_set(b);
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Mean Jaccard index over every unordered pair of texts.
pub fn mean_pairwise_jaccard(texts: &[&str]) -> f64 {
    if texts.len() < 2 {
        return 1.0;
    }
    let sets: Vec<HashSet<String>> = texts.iter().map(|t| token_set(t)).collect();

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            let union = sets[i].union(&sets[j]).count();
            if union > 0 {
                total += sets[i].intersection(&sets[j]).count() as f64 / union as f64;
            }
            pairs += 1;
        }
    }
    (total / pairs as f64).clamp(0.0, 1.0)
}
