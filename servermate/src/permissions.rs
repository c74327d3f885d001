use crate::models::{GuildId, UserId};
use anyhow::Result;
use dashmap::DashMap;
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

/// How long a resolved access decision stays valid.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: UserId,
    pub guild_id: GuildId,
}

impl CacheKey {
    pub fn new(user_id: UserId, guild_id: GuildId) -> Self {
        Self { user_id, guild_id }
    }
}

#[derive(Copy, Clone, Debug)]
struct CacheEntry {
    allowed: bool,
    expires: Instant,
}

struct PermissionCacheRef {
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
}

/// A process-local cache of per-user, per-guild access decisions.
///
/// Entries expire passively: expiry is checked on read and an expired entry
/// observed by a reader is removed. There is no background sweep. Concurrent
/// lookups for the same key are funneled through a per-key lock so that only
/// one resolution hits Discord and the database at a time.
///
/// Internally wraps its data in an `Arc`, so clones are cheap and share state.
#[derive(Clone)]
pub struct PermissionCache(Arc<PermissionCacheRef>);

impl Default for PermissionCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self(Arc::new(PermissionCacheRef {
            ttl,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }))
    }

    /// Number of live cache entries, expired or not. Exposed for the status
    /// endpoint.
    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }

    /// Gets a cached decision. Removes and misses on an entry whose TTL has
    /// lapsed.
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        let now = Instant::now();
        match self.0.entries.get(key) {
            None => return None,
            Some(entry) if now < entry.expires => return Some(entry.allowed),
            Some(_) => {}
        }
        self.0.entries.remove_if(key, |_, entry| entry.expires <= now);
        None
    }

    /// Drops one cached decision, e.g. after an access grant changes.
    pub fn remove(&self, key: &CacheKey) {
        self.0.entries.remove(key);
    }

    /// Drops every cached decision for a guild. Role permission edits affect
    /// an unknown set of users, so the whole guild is invalidated.
    pub fn purge_guild(&self, guild_id: GuildId) {
        self.0.entries.retain(|key, _| key.guild_id != guild_id);
    }

    pub fn insert(&self, key: CacheKey, allowed: bool) {
        self.0.entries.insert(
            key,
            CacheEntry {
                allowed,
                expires: Instant::now() + self.0.ttl,
            },
        );
    }

    /// Returns the cached decision for `key`, or runs `load` to produce one.
    ///
    /// Holds a per-key lock around `load` so concurrent callers for the same
    /// key wait for the first resolution instead of issuing their own.
    /// Errors from `load` are propagated and never cached.
    pub async fn resolve<F, Fut>(&self, key: CacheKey, load: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        if let Some(allowed) = self.get(&key) {
            return Ok(allowed);
        }

        let gate = self
            .0
            .in_flight
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // Another caller may have resolved the key while we waited.
        if let Some(allowed) = self.get(&key) {
            return Ok(allowed);
        }

        let result = load().await;
        if let Ok(allowed) = result {
            self.insert(key, allowed);
        }
        self.0.in_flight.remove(&key);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static_assertions::assert_impl_all!(PermissionCache: Clone, Send, Sync);

    fn key(user: u64, guild: u64) -> CacheKey {
        CacheKey::new(UserId::new(user), GuildId::new(guild))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = PermissionCache::new();
        assert_eq!(cache.get(&key(1, 2)), None);

        cache.insert(key(1, 2), true);
        cache.insert(key(1, 3), false);
        assert_eq!(cache.get(&key(1, 2)), Some(true));
        assert_eq!(cache.get(&key(1, 3)), Some(false));
        assert_eq!(cache.get(&key(2, 2)), None);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_expire_and_are_removed_on_read() {
        let cache = PermissionCache::with_ttl(Duration::from_millis(20));
        cache.insert(key(1, 2), true);
        assert_eq!(cache.get(&key(1, 2)), Some(true));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&key(1, 2)), None);
        // The expired entry is gone, not just hidden.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_purge() {
        let cache = PermissionCache::new();
        cache.insert(key(1, 2), true);
        cache.insert(key(2, 2), true);
        cache.insert(key(1, 3), true);

        cache.remove(&key(1, 2));
        assert_eq!(cache.get(&key(1, 2)), None);
        assert_eq!(cache.get(&key(2, 2)), Some(true));

        cache.purge_guild(GuildId::new(2));
        assert_eq!(cache.get(&key(2, 2)), None);
        assert_eq!(cache.get(&key(1, 3)), Some(true));
    }

    #[tokio::test]
    async fn test_resolve_caches_result() {
        let cache = PermissionCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .resolve(key(1, 2), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap();
        let second = cache
            .resolve(key(1, 2), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            })
            .await
            .unwrap();

        assert!(first);
        assert!(second, "second call must come from the cache");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_deduplicates_concurrent_loads() {
        let cache = PermissionCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let load = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(true)
        };

        let (a, b) = tokio::join!(
            cache.resolve(key(1, 2), || load(calls.clone())),
            cache.resolve(key(1, 2), || load(calls.clone())),
        );
        assert!(a.unwrap());
        assert!(b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_does_not_cache_errors() {
        let cache = PermissionCache::new();
        let calls = AtomicUsize::new(0);

        let err = cache
            .resolve(key(1, 2), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("discord is down")
            })
            .await;
        assert!(err.is_err());

        let ok = cache
            .resolve(key(1, 2), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            })
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
