//! Bounded TTL response cache keyed by request fingerprint.
//!
//! A request is cacheable only when the caller marked it replayable
//! (`metadata.cacheable = true`) and it carries no tools; tool-augmented
//! calls are never memoized because upstream state may change between
//! invocations. Reads never fail: expiry and internal faults both degrade to
//! a miss.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::providers::canonical_json;
use crate::types::{LLMRequest, LLMResponse, MessageContent};

/// Default maximum number of cached responses.
pub const DEFAULT_MAX_SIZE: usize = 256;
/// Default entry time-to-live in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 120;

struct CacheEntry {
    expires_at: Instant,
    response: LLMResponse,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Access order, least-recent first. Keys are unique.
    order: VecDeque<String>,
}

impl CacheInner {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_owned());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// LRU + TTL cache over normalized gateway responses.
///
/// Uses a sync [`Mutex`] since get/set critical sections are short (hash,
/// probe, maybe evict) and contain no awaits.
pub struct ResponseCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, Duration::from_secs(DEFAULT_TTL_SECONDS))
    }
}

impl ResponseCache {
    /// Create a cache with the given capacity and entry TTL.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Whether this request may read from or write to the cache.
    pub fn is_cacheable(req: &LLMRequest) -> bool {
        req.metadata_flag("cacheable") && req.tools.is_empty()
    }

    /// Cache key: provider, concrete model, and a SHA-256 fingerprint of the
    /// canonicalized message list.
    ///
    /// Part sequences are rendered as canonical JSON (recursively sorted
    /// object keys) so the key is stable over content shape.
    pub fn key(provider: &str, model: &str, req: &LLMRequest) -> String {
        let mut rendered: Vec<String> = Vec::with_capacity(req.messages.len());
        for message in &req.messages {
            let content = match &message.content {
                MessageContent::Text(text) => text.clone(),
                MessageContent::Parts(_) => {
                    let value =
                        serde_json::to_value(&message.content).unwrap_or(serde_json::Value::Null);
                    canonical_json(&value)
                }
            };
            rendered.push(format!("{}:{content}", message.role.as_str()));
        }
        let digest = Sha256::digest(rendered.join("\n").as_bytes());
        format!("{provider}:{model}:{}", hex::encode(digest))
    }

    /// Look up a cached response.
    ///
    /// A hit refreshes the entry's access position. A read that observes an
    /// expired entry deletes it and misses.
    pub fn get(&self, provider: &str, model: &str, req: &LLMRequest) -> Option<LLMResponse> {
        let key = Self::key(provider, model, req);
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        let expired = match inner.entries.get(&key) {
            None => return None,
            Some(entry) => Instant::now() >= entry.expires_at,
        };
        if expired {
            inner.remove(&key);
            return None;
        }
        inner.touch(&key);
        inner.entries.get(&key).map(|e| e.response.clone())
    }

    /// Store a response, evicting least-recently-used entries on overflow.
    pub fn set(&self, provider: &str, model: &str, req: &LLMRequest, res: &LLMResponse) {
        let key = Self::key(provider, model, req);
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                expires_at: Instant::now()
                    .checked_add(self.ttl)
                    .unwrap_or_else(Instant::now),
                response: res.clone(),
            },
        );
        inner.touch(&key);
        while inner.entries.len() > self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Number of live entries (expired entries count until observed).
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
