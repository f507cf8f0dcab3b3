//! Permission cache for admin and directory-owner checks
//!
//! Only the two membership checks that every request performs are cached.
//! Entries expire after a TTL; writes to the admin and owner tables
//! invalidate the affected user, and deleting a directory clears everything.
//! A stale entry can therefore grant or deny for at most one TTL window.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Which membership check a cache entry answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    Admin,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CheckKind,
    /// `None` for platform-wide checks
    pub directory_id: Option<String>,
    pub email: String,
}

impl CacheKey {
    pub fn admin(email: &str) -> Self {
        Self {
            kind: CheckKind::Admin,
            directory_id: None,
            email: email.to_string(),
        }
    }

    pub fn owner(directory_id: &str, email: &str) -> Self {
        Self {
            kind: CheckKind::Owner,
            directory_id: Some(directory_id.to_string()),
            email: email.to_string(),
        }
    }
}

/// Injectable cache of boolean permission checks
pub trait PermissionCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<bool>;

    fn set(&self, key: CacheKey, allowed: bool);

    /// Drop every entry for one email
    fn invalidate_user(&self, email: &str);

    fn clear(&self);
}

/// Cache that never stores anything; every check hits the database
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPermissionCache;

impl PermissionCache for NoopPermissionCache {
    fn get(&self, _key: &CacheKey) -> Option<bool> {
        None
    }

    fn set(&self, _key: CacheKey, _allowed: bool) {}

    fn invalidate_user(&self, _email: &str) {}

    fn clear(&self) {}
}

struct CacheEntry {
    allowed: bool,
    expires_at: Instant,
}

/// In-memory TTL cache backed by a concurrent map
pub struct TtlPermissionCache {
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl TtlPermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

impl Default for TtlPermissionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl PermissionCache for TtlPermissionCache {
    fn get(&self, key: &CacheKey) -> Option<bool> {
        // Copy out before any removal; holding the ref while removing deadlocks the shard
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.allowed, entry.expires_at));

        match hit {
            Some((allowed, expires_at)) if expires_at > Instant::now() => {
                debug!("Permission cache hit for {:?}", key);
                Some(allowed)
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: CacheKey, allowed: bool) {
        self.entries.insert(
            key,
            CacheEntry {
                allowed,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn invalidate_user(&self, email: &str) {
        self.entries.retain(|key, _| key.email != email);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = TtlPermissionCache::default();
        cache.set(CacheKey::admin("a@x.com"), true);
        cache.set(CacheKey::owner("d1", "a@x.com"), false);

        assert_eq!(cache.get(&CacheKey::admin("a@x.com")), Some(true));
        assert_eq!(cache.get(&CacheKey::owner("d1", "a@x.com")), Some(false));
        assert_eq!(cache.get(&CacheKey::owner("d2", "a@x.com")), None);
    }

    #[test]
    fn test_entries_expire() {
        let cache = TtlPermissionCache::new(Duration::from_millis(20));
        cache.set(CacheKey::admin("a@x.com"), true);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get(&CacheKey::admin("a@x.com")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_user_only_touches_that_user() {
        let cache = TtlPermissionCache::default();
        cache.set(CacheKey::admin("a@x.com"), true);
        cache.set(CacheKey::owner("d1", "a@x.com"), true);
        cache.set(CacheKey::owner("d1", "b@x.com"), true);

        cache.invalidate_user("a@x.com");

        assert_eq!(cache.get(&CacheKey::admin("a@x.com")), None);
        assert_eq!(cache.get(&CacheKey::owner("d1", "a@x.com")), None);
        assert_eq!(cache.get(&CacheKey::owner("d1", "b@x.com")), Some(true));
    }

    #[test]
    fn test_clear_and_purge() {
        let cache = TtlPermissionCache::new(Duration::from_millis(150));
        cache.set(CacheKey::admin("a@x.com"), true);
        std::thread::sleep(Duration::from_millis(200));
        cache.set(CacheKey::admin("b@x.com"), true);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_noop_cache_stores_nothing() {
        let cache = NoopPermissionCache;
        cache.set(CacheKey::admin("a@x.com"), true);
        assert_eq!(cache.get(&CacheKey::admin("a@x.com")), None);
    }
}
