use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::warn;

use super::CacheKey;

/// A token as issued by the token endpoint. Never edited after creation.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: Instant,
}

impl CachedToken {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory bearer token store with lazy expiry.
///
/// The lock is only held for the map lookup or insert, never across a fetch.
/// Two concurrent misses on one key both fetch and the last write wins.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedToken> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .cloned()
    }

    /// A `ttl` past the clock's range is not cached at all.
    pub fn put(&self, key: CacheKey, token: impl Into<String>, ttl: Duration) {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            warn!(key = %key, ttl_secs = ttl.as_secs(), "token lifetime out of range, not caching");
            return;
        };
        let entry = CachedToken {
            value: token.into(),
            expires_at,
        };
        self.entries.write().insert(key, entry);
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
