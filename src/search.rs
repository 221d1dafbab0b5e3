//! Debounced search.
//!
//! Input is held until it has been unchanged for the full delay; only then
//! is a search issued. Searches already in flight are not cancelled, but a
//! result that arrives after a newer search was requested is discarded.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::gateway::GatewayResult;
use crate::model::Post;
use crate::query::Queries;

/// Holds the latest input until it has been quiet for `delay`.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Replace any pending value and restart the quiet period
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at)
    }

    /// The pending value, if its quiet period has elapsed by `now`
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(at) if at <= now => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }
}

/// Forward settled values from `input` after `delay` of quiet.
///
/// The task ends when either side is dropped; a value still waiting out
/// its delay at that point is dropped too.
pub fn debounce<T>(
    mut input: watch::Receiver<T>,
    delay: Duration,
) -> (mpsc::Receiver<T>, JoinHandle<()>)
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        let mut debouncer = Debouncer::new(delay);
        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                changed = input.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let value = input.borrow_and_update().clone();
                    debouncer.push(value, Instant::now());
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(value) = debouncer.poll(Instant::now()) {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    (rx, handle)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub term: String,
    pub posts: Vec<Post>,
    /// Request sequence number the results belong to
    pub sequence: u64,
}

pub struct SearchController {
    queries: Arc<Queries>,
    sequence: AtomicU64,
    results: Mutex<SearchResults>,
}

impl SearchController {
    pub fn new(queries: Arc<Queries>) -> Self {
        Self {
            queries,
            sequence: AtomicU64::new(0),
            results: Mutex::new(SearchResults::default()),
        }
    }

    pub fn results(&self) -> SearchResults {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one search. Returns whether its results were kept.
    pub async fn search(&self, term: &str) -> GatewayResult<bool> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let term = term.trim().to_string();

        let posts = if term.is_empty() {
            Vec::new()
        } else {
            self.queries.search_posts(&term).await?
        };

        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        if sequence != self.sequence.load(Ordering::SeqCst) {
            tracing::debug!(term = %term, sequence, "Discarding superseded search results");
            return Ok(false);
        }
        *results = SearchResults {
            term,
            posts,
            sequence,
        };
        Ok(true)
    }

    /// Search every settled term from `input`, each in its own task.
    pub fn attach(
        self: Arc<Self>,
        input: watch::Receiver<String>,
        delay: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (mut terms, debounce_task) = debounce(input, delay);
            while let Some(term) = terms.recv().await {
                let controller = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = controller.search(&term).await {
                        tracing::warn!(term = %term, "Search failed: {}", e);
                    }
                });
            }
            debounce_task.abort();
        })
    }
}
