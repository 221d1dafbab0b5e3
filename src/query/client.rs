// In-memory query cache with freshness and invalidation
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::infinite::InfiniteQuery;
use super::key::{KeyPattern, QueryKey};
use crate::gateway::GatewayResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Fetching,
    Success,
    /// Last attempt failed; the next fetch is a fresh attempt
    Failed,
}

struct Entry {
    value: Option<Arc<dyn Any + Send + Sync>>,
    fetched_at: Option<Instant>,
    status: QueryStatus,
    invalidated: bool,
    /// Bumped by every invalidation, so results of fetches that started
    /// before it are never treated as fresh
    generation: u64,
}

impl Entry {
    fn empty() -> Self {
        Self {
            value: None,
            fetched_at: None,
            status: QueryStatus::Fetching,
            invalidated: false,
            generation: 0,
        }
    }
}

pub struct QueryClient {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    infinite: Mutex<HashMap<QueryKey, Arc<InfiniteQuery>>>,
    stale_time: Duration,
}

impl QueryClient {
    pub fn new(stale_time: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            infinite: Mutex::new(HashMap::new()),
            stale_time,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached value if fresh, otherwise the result of `fetcher`, which is cached.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> GatewayResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let started_generation = {
            let mut entries = self.entries();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
            if let Some(value) = self.fresh_value::<T>(entry) {
                tracing::trace!(%key, "Query cache hit");
                return Ok(value);
            }
            entry.status = QueryStatus::Fetching;
            entry.generation
        };

        tracing::debug!(%key, "Fetching query");
        let result = fetcher().await;

        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
        match &result {
            Ok(value) => {
                entry.value = Some(Arc::new(value.clone()));
                entry.fetched_at = Some(Instant::now());
                entry.status = QueryStatus::Success;
                entry.invalidated = entry.generation != started_generation;
            }
            Err(e) => {
                tracing::warn!(%key, "Query failed: {}", e);
                entry.status = QueryStatus::Failed;
            }
        }
        result
    }

    fn fresh_value<T: Clone + 'static>(&self, entry: &Entry) -> Option<T> {
        if entry.status != QueryStatus::Success || entry.invalidated {
            return None;
        }
        let fetched_at = entry.fetched_at?;
        if fetched_at.elapsed() >= self.stale_time {
            return None;
        }
        entry.value.as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Last successfully fetched value, fresh or not
    pub fn peek<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let entries = self.entries();
        entries
            .get(key)?
            .value
            .as_ref()?
            .downcast_ref::<T>()
            .cloned()
    }

    pub fn status(&self, key: &QueryKey) -> Option<QueryStatus> {
        self.entries().get(key).map(|e| e.status)
    }

    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        let entries = self.entries();
        entries.get(key).is_some_and(|entry| {
            entry.status == QueryStatus::Success
                && !entry.invalidated
                && entry
                    .fetched_at
                    .is_some_and(|at| at.elapsed() < self.stale_time)
        })
    }

    /// Mark every matching entry stale. Returns how many entries matched.
    pub fn invalidate(&self, patterns: &[KeyPattern]) -> usize {
        let mut count = 0;
        {
            let mut entries = self.entries();
            for (key, entry) in entries.iter_mut() {
                if patterns.iter().any(|p| p.matches(key)) {
                    entry.invalidated = true;
                    entry.generation += 1;
                    count += 1;
                }
            }
        }

        let infinite = self.infinite.lock().unwrap_or_else(|e| e.into_inner());
        for (key, query) in infinite.iter() {
            if patterns.iter().any(|p| p.matches(key)) {
                query.reset();
                count += 1;
            }
        }

        tracing::debug!(count, "Invalidated queries");
        count
    }

    /// Drop every cached entry, e.g. after sign-out
    pub fn clear(&self) {
        self.entries().clear();
        self.infinite
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Run a side-effecting operation; on success invalidate `invalidates`.
    pub async fn mutate<T, F, Fut>(&self, invalidates: &[KeyPattern], op: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let result = op().await;
        match &result {
            Ok(_) => {
                self.invalidate(invalidates);
            }
            Err(e) => tracing::warn!("Mutation failed: {}", e),
        }
        result
    }

    /// The paginated query stored under `key`, created on first use
    pub fn infinite(&self, key: QueryKey) -> Arc<InfiniteQuery> {
        let mut infinite = self.infinite.lock().unwrap_or_else(|e| e.into_inner());
        infinite
            .entry(key)
            .or_insert_with(|| Arc::new(InfiniteQuery::new()))
            .clone()
    }
}
