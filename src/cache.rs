//! Single-flight memo cache
//!
//! Concurrent requests for the same key share one in-flight load; once it
//! succeeds every later request is served from memory until the entry is
//! invalidated. A failed load is not remembered, so the next request tries
//! again.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Memoizes async loads by string key
pub struct MemoCache<V> {
    entries: DashMap<String, Arc<OnceCell<V>>>,
}

impl<V> Default for MemoCache<V> {
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<V> MemoCache<V>
where
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, running `load` at most once across
    /// concurrent callers
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        cell.get_or_try_init(load).await.cloned()
    }

    /// Cached value, without loading
    pub fn peek(&self, key: &str) -> Option<V> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Drop every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        debug!(prefix = %prefix, dropped = before - self.entries.len(), "Invalidated memo entries");
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
