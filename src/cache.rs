//! Memoization for rollup results
//!
//! Aggregation passes re-read every transcript file, so repeated queries for
//! the same rollup are cached here. The cache is advisory: entries never
//! expire on their own and are dropped only through explicit invalidation,
//! which callers issue after new transcript data lands.
//!
//! Computation happens outside the lock, so two tasks racing on a cold key
//! may both compute the same rollup; the duplicated work is accepted in
//! exchange for never holding the map lock across an await of the loader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Cache key: the query scope plus a string encoding of its parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    /// Project the query was restricted to, if any
    pub project: Option<String>,
    /// Canonical encoding of the remaining query parameters
    pub params: String,
}

impl ScopeKey {
    pub fn new(project: Option<String>, params: impl Into<String>) -> Self {
        Self {
            project,
            params: params.into(),
        }
    }
}

/// Concurrent cache for one kind of rollup result
///
/// Values are stored behind `Arc` so a hit hands out a shared handle instead
/// of cloning the rollup.
pub struct RollupCache<T> {
    entries: RwLock<HashMap<ScopeKey, Arc<T>>>,
}

impl<T> RollupCache<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a cached rollup
    pub async fn get(&self, key: &ScopeKey) -> Option<Arc<T>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store a rollup, replacing any previous value for the key
    pub async fn insert(&self, key: ScopeKey, value: Arc<T>) {
        self.entries.write().await.insert(key, value);
    }

    /// Return the cached rollup or compute and store it
    ///
    /// The future runs without any cache lock held. When two tasks race on
    /// the same cold key, both compute and the later insert wins.
    pub async fn get_or_compute<F, Fut, E>(&self, key: ScopeKey, compute: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(&key).await {
            debug!("Cache hit for {:?}", key);
            return Ok(cached);
        }

        debug!("Cache miss for {:?}", key);
        let value = Arc::new(compute().await?);
        self.insert(key, Arc::clone(&value)).await;
        Ok(value)
    }

    /// Invalidate entries for one project, or every entry
    ///
    /// With a project scope, unscoped entries are also dropped: a rollup over
    /// all projects includes the invalidated project's data.
    pub async fn invalidate(&self, project: Option<&str>) {
        let mut entries = self.entries.write().await;
        match project {
            None => entries.clear(),
            Some(project) => {
                entries.retain(|key, _| {
                    key.project.as_deref().is_some_and(|p| p != project)
                });
            }
        }
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of cached entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<T> Default for RollupCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CctallyError;

    fn key(project: Option<&str>, params: &str) -> ScopeKey {
        ScopeKey::new(project.map(str::to_string), params)
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_the_value() {
        let cache: RollupCache<u64> = RollupCache::new();

        let first = cache
            .get_or_compute(key(None, "daily"), || async { Ok::<_, CctallyError>(42) })
            .await
            .unwrap();
        assert_eq!(*first, 42);

        // The second compute closure must not run; unwrap fails if it did
        let second = cache
            .get_or_compute(key(None, "daily"), || async {
                Err::<u64, CctallyError>(CctallyError::InvalidArgument(
                    "recomputed a cached key".to_string(),
                ))
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_compute_errors_are_not_cached() {
        let cache: RollupCache<u64> = RollupCache::new();

        let result = cache
            .get_or_compute(key(None, "daily"), || async {
                Err::<u64, _>(CctallyError::InvalidDate("bad".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty().await);

        let retry = cache
            .get_or_compute(key(None, "daily"), || async { Ok::<_, CctallyError>(7) })
            .await
            .unwrap();
        assert_eq!(*retry, 7);
    }

    #[tokio::test]
    async fn test_distinct_params_are_distinct_entries() {
        let cache: RollupCache<u64> = RollupCache::new();
        cache.insert(key(None, "daily"), Arc::new(1)).await;
        cache.insert(key(None, "monthly"), Arc::new(2)).await;

        assert_eq!(*cache.get(&key(None, "daily")).await.unwrap(), 1);
        assert_eq!(*cache.get(&key(None, "monthly")).await.unwrap(), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache: RollupCache<u64> = RollupCache::new();
        cache.insert(key(None, "a"), Arc::new(1)).await;
        cache.insert(key(Some("p1"), "a"), Arc::new(2)).await;

        cache.invalidate(None).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_project_drops_unscoped_entries_too() {
        let cache: RollupCache<u64> = RollupCache::new();
        cache.insert(key(None, "a"), Arc::new(1)).await;
        cache.insert(key(Some("p1"), "a"), Arc::new(2)).await;
        cache.insert(key(Some("p2"), "a"), Arc::new(3)).await;

        cache.invalidate(Some("p1")).await;

        // p1-scoped and unscoped entries are gone; p2 survives
        assert!(cache.get(&key(Some("p1"), "a")).await.is_none());
        assert!(cache.get(&key(None, "a")).await.is_none());
        assert_eq!(*cache.get(&key(Some("p2"), "a")).await.unwrap(), 3);
    }
}
