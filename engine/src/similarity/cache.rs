//! Bounded embedding cache with oldest-first eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Default number of cached vectors.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
/// Default number of leading characters used as the cache key.
pub const DEFAULT_KEY_CHARS: usize = 100;

struct CacheEntry {
    /// Full input text; a prefix collision is treated as a miss.
    text: String,
    vector: Arc<Vec<f32>>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Vector cache shared by every debate using the same similarity engine.
///
/// Keys are `"{model}:{text prefix}"`. Entries also keep the full text so two
/// inputs sharing a prefix never receive each other's vector.
pub struct EmbeddingCache {
    capacity: usize,
    key_chars: usize,
    inner: Mutex<CacheInner>,
}

impl EmbeddingCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, key_chars: usize) -> Self {
        Self {
            capacity,
            key_chars,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A panic while holding the lock leaves the maps structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self, model: &str, text: &str) -> String {
        let prefix: String = text.chars().take(self.key_chars).collect();
        format!("{model}:{prefix}")
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Arc<Vec<f32>>> {
        if self.capacity == 0 {
            return None;
        }
        let key = self.key(model, text);
        let mut inner = self.lock();
        let found = inner
            .entries
            .get(&key)
            .filter(|entry| entry.text == text)
            .map(|entry| Arc::clone(&entry.vector));
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    pub fn insert(&self, model: &str, text: &str, vector: Arc<Vec<f32>>) {
        if self.capacity == 0 {
            return;
        }
        let key = self.key(model, text);
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.text = text.to_string();
            entry.vector = vector;
            return;
        }

        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                text: text.to_string(),
                vector,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_KEY_CHARS)
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("capacity", &self.capacity)
            .field("key_chars", &self.key_chars)
            .field("stats", &self.stats())
            .finish()
    }
}
