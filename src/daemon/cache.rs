//! TTL cache for non-streamed answers.

use super::llm::GenerationParams;
use crate::protocol::ChatMessage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    response: String,
    stored_at: Instant,
}

/// Answers keyed by a digest of the conversation and its parameters.
pub struct ResponseCache {
    ttl: Duration,
    entries: HashMap<String, Entry>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Digest of everything that influences the answer.
    pub fn key(messages: &[ChatMessage], params: GenerationParams) -> String {
        let mut hasher = Sha256::new();
        for message in messages {
            // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
            let role = serde_json::to_string(&message.role).unwrap_or_default();
            hasher.update((role.len() as u64).to_be_bytes());
            hasher.update(role.as_bytes());
            hasher.update((message.content.len() as u64).to_be_bytes());
            hasher.update(message.content.as_bytes());
        }
        hasher.update(params.temperature.to_bits().to_be_bytes());
        hasher.update(params.max_tokens.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a live entry, dropping it if it has expired.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.ttl => {
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&mut self, key: String, response: String, now: Instant) {
        self.entries.retain(|_, e| now.duration_since(e.stored_at) < self.ttl);
        self.entries.insert(
            key,
            Entry {
                response,
                stored_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: GenerationParams = GenerationParams {
        temperature: 0.9,
        max_tokens: 2000,
    };

    #[test]
    fn test_hit_within_ttl() {
        let mut cache = ResponseCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        let key = ResponseCache::key(&[ChatMessage::user("hi")], PARAMS);
        cache.insert(key.clone(), "hello".into(), t0);
        assert_eq!(cache.get(&key, t0 + Duration::from_secs(299)), Some("hello".into()));
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let mut cache = ResponseCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        let key = ResponseCache::key(&[ChatMessage::user("hi")], PARAMS);
        cache.insert(key.clone(), "hello".into(), t0);
        assert_eq!(cache.get(&key, t0 + Duration::from_secs(300)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_depends_on_params_and_history() {
        let messages = [ChatMessage::user("hi")];
        let base = ResponseCache::key(&messages, PARAMS);
        let hotter = GenerationParams {
            temperature: 1.2,
            ..PARAMS
        };
        assert_ne!(base, ResponseCache::key(&messages, hotter));
        assert_ne!(
            base,
            ResponseCache::key(&[ChatMessage::assistant("hi")], PARAMS)
        );
        assert_ne!(
            ResponseCache::key(&[ChatMessage::user("ab"), ChatMessage::user("c")], PARAMS),
            ResponseCache::key(&[ChatMessage::user("a"), ChatMessage::user("bc")], PARAMS)
        );
        assert_eq!(base, ResponseCache::key(&messages, PARAMS));
    }

    #[test]
    fn test_insert_sweeps_expired() {
        let mut cache = ResponseCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert("old".into(), "a".into(), t0);
        cache.insert("new".into(), "b".into(), t0 + Duration::from_secs(11));
        assert_eq!(cache.len(), 1);
    }
}
