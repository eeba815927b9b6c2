//! A small fixed-capacity cache of recent tag authentication results,
//! letting the verifier skip a cloud round-trip for a tag seen again
//! within its entry's TTL. TTL arithmetic uses `Instant` (monotonic) —
//! the cache never needs to reason about wall-clock skew, only elapsed
//! time since insertion.

use std::time::{Duration, Instant};

use crate::types::{Identifier, TagUid};

/// Default TTL for a cache entry, used unless the verifier overrides it
/// at insert time (`auth_cache_ttl`, default 4 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Fixed number of slots the cache holds at once.
pub const CAPACITY: usize = 8;

#[derive(Debug, Clone)]
struct AuthCacheEntry {
    tag_uid: TagUid,
    user_id: Identifier,
    user_label: String,
    auth_id: Identifier,
    inserted_at: Instant,
    ttl: Duration,
}

impl AuthCacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// A cached, successfully authorized tag: what the verifier needs to
/// re-establish a session without calling the cloud again.
#[derive(Debug, Clone)]
pub struct CachedAuth {
    pub user_id: Identifier,
    pub user_label: String,
    pub auth_id: Identifier,
}

/// Fixed-capacity auth cache (8 slots by default, configurable via
/// `CoreConfig::cache_capacity`). At most one valid
/// entry per `tag_uid`; a lookup that finds an expired entry invalidates
/// it in place before returning `None`, rather than leaving stale data
/// for a later insert to collide with.
#[derive(Debug)]
pub struct AuthCache {
    capacity: usize,
    entries: Vec<AuthCacheEntry>,
}

impl Default for AuthCache {
    fn default() -> Self {
        AuthCache::with_capacity(CAPACITY)
    }
}

impl AuthCache {
    pub fn new() -> Self {
        AuthCache::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        AuthCache {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Look up `tag_uid`. Treats an expired entry as absent and removes
    /// it immediately.
    pub fn get(&mut self, tag_uid: TagUid, now: Instant) -> Option<CachedAuth> {
        let index = self.entries.iter().position(|e| e.tag_uid == tag_uid)?;
        if self.entries[index].is_expired(now) {
            self.entries.remove(index);
            return None;
        }
        let entry = &self.entries[index];
        Some(CachedAuth {
            user_id: entry.user_id,
            user_label: entry.user_label.clone(),
            auth_id: entry.auth_id,
        })
    }

    /// Insert or replace the entry for `tag_uid`, with `ttl` starting
    /// from `now`. Evicts the entry with the smallest `inserted_at` when
    /// the cache is already full.
    pub fn insert(
        &mut self,
        tag_uid: TagUid,
        user_id: Identifier,
        user_label: String,
        auth_id: Identifier,
        now: Instant,
        ttl: Duration,
    ) {
        self.entries.retain(|e| e.tag_uid != tag_uid);
        if self.entries.len() >= self.capacity {
            if let Some((oldest_index, _)) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.inserted_at)
            {
                self.entries.remove(oldest_index);
            }
        }
        self.entries.push(AuthCacheEntry {
            tag_uid,
            user_id,
            user_label,
            auth_id,
            inserted_at: now,
            ttl,
        });
    }

    /// Insert using [`DEFAULT_TTL`].
    pub fn insert_default_ttl(
        &mut self,
        tag_uid: TagUid,
        user_id: Identifier,
        user_label: String,
        auth_id: Identifier,
        now: Instant,
    ) {
        self.insert(tag_uid, user_id, user_label, auth_id, now, DEFAULT_TTL);
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
