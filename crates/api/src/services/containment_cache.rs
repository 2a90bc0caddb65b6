//! In-process containment cache with per-entry expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use domain::ports::{ContainmentCache, ServiceError};
use tokio::time::Instant;

struct Entry {
    inside: bool,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> Option<bool> {
        (self.expires_at > now).then_some(self.inside)
    }
}

/// Containment cache backed by a mutex-guarded map. `swap` holds the lock
/// across read and write, so concurrent swaps on one key are serialised.
#[derive(Default)]
pub struct InMemoryContainmentCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryContainmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ContainmentCache for InMemoryContainmentCache {
    async fn get(&self, key: &str) -> Result<Option<bool>, ServiceError> {
        Ok(self.lock().get(key).and_then(|e| e.live(Instant::now())))
    }

    async fn set(&self, key: &str, inside: bool, ttl: Duration) -> Result<(), ServiceError> {
        self.lock().insert(
            key.to_string(),
            Entry {
                inside,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn swap(
        &self,
        key: &str,
        inside: bool,
        ttl: Duration,
    ) -> Result<Option<bool>, ServiceError> {
        let now = Instant::now();
        let previous = self.lock().insert(
            key.to_string(),
            Entry {
                inside,
                expires_at: now + ttl,
            },
        );
        Ok(previous.and_then(|e| e.live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_swap_returns_previous_value() {
        let cache = InMemoryContainmentCache::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(cache.swap("k", false, ttl).await.unwrap(), None);
        assert_eq!(cache.swap("k", true, ttl).await.unwrap(), Some(false));
        assert_eq!(cache.get("k").await.unwrap(), Some(true));
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryContainmentCache::new();
        cache.set("k", true, Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(
            cache.swap("k", false, Duration::from_secs(5)).await.unwrap(),
            None
        );
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = InMemoryContainmentCache::new();
        cache.set("a", true, Duration::from_secs(1)).await.unwrap();
        cache.set("b", true, Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
