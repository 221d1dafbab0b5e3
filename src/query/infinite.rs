// Cursor-paginated feed state
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::gateway::GatewayResult;
use crate::model::{FeedCursor, Page, Post};

#[derive(Default)]
struct FeedState {
    pages: Vec<Page>,
    /// Cursors that already produced a page in this feed generation
    issued: HashSet<Option<FeedCursor>>,
    next: Option<FeedCursor>,
    exhausted: bool,
}

/// Pages of one feed, fetched strictly in cursor order.
///
/// The state lock is held for the whole fetch, so concurrent
/// `fetch_next_page` calls run one after another and each asks for the
/// page after the previous one.
pub struct InfiniteQuery {
    state: Mutex<FeedState>,
    stale: AtomicBool,
}

impl Default for InfiniteQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl InfiniteQuery {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FeedState::default()),
            stale: AtomicBool::new(false),
        }
    }

    /// Start over from the first page on the next fetch
    pub fn reset(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Fetch the page after the last one loaded.
    ///
    /// Returns `Ok(None)` once the feed is exhausted; the empty page that
    /// ends the feed is not stored.
    pub async fn fetch_next_page<F, Fut>(&self, fetcher: F) -> GatewayResult<Option<Page>>
    where
        F: FnOnce(Option<FeedCursor>) -> Fut,
        Fut: Future<Output = GatewayResult<Page>>,
    {
        let mut state = self.state.lock().await;
        if self.stale.swap(false, Ordering::SeqCst) {
            *state = FeedState::default();
        }
        if state.exhausted {
            return Ok(None);
        }

        let cursor = state.next.clone();
        if state.issued.contains(&cursor) {
            tracing::warn!(cursor = ?cursor, "Feed cursor did not advance; stopping");
            state.exhausted = true;
            return Ok(None);
        }

        let page = fetcher(cursor.clone()).await?;
        state.issued.insert(cursor);

        if page.is_empty() {
            state.exhausted = true;
            return Ok(None);
        }

        state.next = page.cursor.clone();
        state.pages.push(page.clone());
        Ok(Some(page))
    }

    /// Load the first page if nothing is loaded yet (or after a reset)
    pub async fn ensure_first_page<F, Fut>(&self, fetcher: F) -> GatewayResult<Vec<Page>>
    where
        F: FnOnce(Option<FeedCursor>) -> Fut,
        Fut: Future<Output = GatewayResult<Page>>,
    {
        let needs_first = self.stale.load(Ordering::SeqCst) || {
            let state = self.state.lock().await;
            state.pages.is_empty() && !state.exhausted
        };
        if needs_first {
            self.fetch_next_page(fetcher).await?;
        }
        Ok(self.pages().await)
    }

    pub async fn has_next_page(&self) -> bool {
        !self.state.lock().await.exhausted
    }

    pub async fn pages(&self) -> Vec<Page> {
        self.state.lock().await.pages.clone()
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.state
            .lock()
            .await
            .pages
            .iter()
            .flat_map(|page| page.posts.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::model::{FileId, PostId, UserId};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex as StdMutex;

    fn post(n: i64) -> Post {
        let at = Utc.timestamp_opt(1_700_000_000 - n, 0).unwrap();
        Post {
            id: PostId::new(format!("p{n:02}")),
            creator: UserId::new("u1"),
            caption: format!("post {n}"),
            image_id: FileId::new("f"),
            image_url: "/storage/f/preview".into(),
            location: "here".into(),
            tags: Vec::new(),
            likes: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Feed of `total` posts, newest first, served in pages of `size`
    fn serve(total: i64, size: usize, cursor: Option<FeedCursor>) -> Page {
        let posts: Vec<Post> = (0..total)
            .map(post)
            .filter(|p| {
                cursor
                    .as_ref()
                    .map_or(true, |c| c.precedes(p.updated_at, p.id.as_str()))
            })
            .take(size)
            .collect();
        Page::new(posts)
    }

    #[tokio::test]
    async fn pages_until_empty_and_never_reissues_a_cursor() {
        let feed = InfiniteQuery::new();
        let requested = StdMutex::new(Vec::new());

        loop {
            let page = feed
                .fetch_next_page(|cursor| {
                    requested.lock().unwrap().push(cursor.clone());
                    async move { Ok::<_, GatewayError>(serve(7, 3, cursor)) }
                })
                .await
                .unwrap();
            if page.is_none() {
                break;
            }
        }

        let requested = requested.into_inner().unwrap();
        // 3 + 3 + 1 posts, then the empty page
        assert_eq!(requested.len(), 4);
        assert_eq!(requested[0], None);
        let unique: HashSet<_> = requested.iter().cloned().collect();
        assert_eq!(unique.len(), requested.len());

        assert!(!feed.has_next_page().await);
        assert_eq!(feed.pages().await.len(), 3);
        assert_eq!(feed.posts().await.len(), 7);

        // Exhausted feeds issue no more requests
        let more = feed
            .fetch_next_page(|_| async {
                Err::<Page, _>(GatewayError::NotFound("unexpected request".into()))
            })
            .await
            .unwrap();
        assert!(more.is_none());
    }

    #[tokio::test]
    async fn failed_page_can_be_retried_with_the_same_cursor() {
        let feed = InfiniteQuery::new();
        feed.fetch_next_page(|c| async move { Ok::<_, GatewayError>(serve(5, 2, c)) })
            .await
            .unwrap();

        let failed = feed
            .fetch_next_page(|_| async { Err::<Page, _>(GatewayError::Unauthorized) })
            .await;
        assert!(failed.is_err());
        assert!(feed.has_next_page().await);

        let page = feed
            .fetch_next_page(|c| async move { Ok::<_, GatewayError>(serve(5, 2, c)) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.posts[0].id, PostId::new("p02"));
    }

    #[tokio::test]
    async fn reset_starts_from_the_first_page() {
        let feed = InfiniteQuery::new();
        for _ in 0..2 {
            feed.fetch_next_page(|c| async move { Ok::<_, GatewayError>(serve(5, 2, c)) })
                .await
                .unwrap();
        }
        feed.reset();

        let pages = feed
            .ensure_first_page(|c| async move {
                assert!(c.is_none());
                Ok::<_, GatewayError>(serve(5, 2, c))
            })
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].posts[0].id, PostId::new("p00"));
    }

    #[tokio::test]
    async fn cursor_that_does_not_advance_stops_the_feed() {
        let feed = InfiniteQuery::new();
        let stuck = serve(3, 1, None);
        for _ in 0..2 {
            let page = stuck.clone();
            feed.fetch_next_page(|_| async move { Ok::<_, GatewayError>(page) })
                .await
                .unwrap();
        }
        let page = stuck.clone();
        let third = feed
            .fetch_next_page(|_| async move { Ok::<_, GatewayError>(page) })
            .await
            .unwrap();
        assert!(third.is_none());
        assert!(!feed.has_next_page().await);
    }
}
