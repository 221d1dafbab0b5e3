// Named queries and mutations with their cache keys and invalidation sets
use std::sync::Arc;
use std::time::Duration;

use super::client::QueryClient;
use super::infinite::InfiniteQuery;
use super::key::{KeyKind, KeyPattern, QueryKey};
use crate::backend::Session;
use crate::gateway::{Gateway, GatewayResult};
use crate::model::{
    NewPost, NewUser, Page, Post, PostId, RecordId, SavedPostRecord, UpdatePost, UpdateUser,
    User, UserId,
};

/// Every cached view that may render a given post
fn post_views(id: &PostId) -> Vec<KeyPattern> {
    vec![
        QueryKey::PostById(id.clone()).into(),
        KeyKind::RecentPosts.into(),
        KeyKind::InfinitePosts.into(),
        KeyKind::SearchPosts.into(),
        KeyKind::UserPosts.into(),
        KeyKind::SavedPosts.into(),
    ]
}

pub struct Queries {
    gateway: Gateway,
    client: QueryClient,
}

impl Queries {
    pub fn new(gateway: Gateway, stale_time: Duration) -> Self {
        Self {
            gateway,
            client: QueryClient::new(stale_time),
        }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    // --- Queries ---

    pub async fn get_recent_posts(&self) -> GatewayResult<Vec<Post>> {
        self.client
            .fetch(QueryKey::RecentPosts, || self.gateway.get_recent_posts())
            .await
    }

    pub fn infinite_posts(&self) -> Arc<InfiniteQuery> {
        self.client.infinite(QueryKey::InfinitePosts)
    }

    /// Pages loaded so far, loading the first one if needed
    pub async fn get_infinite_posts(&self) -> GatewayResult<Vec<Page>> {
        self.infinite_posts()
            .ensure_first_page(|cursor| self.gateway.get_infinite_posts(cursor))
            .await
    }

    pub async fn fetch_next_page(&self) -> GatewayResult<Option<Page>> {
        self.infinite_posts()
            .fetch_next_page(|cursor| self.gateway.get_infinite_posts(cursor))
            .await
    }

    pub async fn search_posts(&self, term: &str) -> GatewayResult<Vec<Post>> {
        let term = term.trim().to_string();
        self.client
            .fetch(QueryKey::SearchPosts(term.clone()), || {
                self.gateway.search_posts(&term)
            })
            .await
    }

    pub async fn get_post_by_id(&self, id: &PostId) -> GatewayResult<Post> {
        self.client
            .fetch(QueryKey::PostById(id.clone()), || {
                self.gateway.get_post_by_id(id)
            })
            .await
    }

    pub async fn get_user_posts(&self, user: &UserId) -> GatewayResult<Vec<Post>> {
        self.client
            .fetch(QueryKey::UserPosts(user.clone()), || {
                self.gateway.get_user_posts(user)
            })
            .await
    }

    pub async fn get_current_user(&self, token: &str) -> GatewayResult<User> {
        self.client
            .fetch(QueryKey::CurrentUser, || self.gateway.get_current_user(token))
            .await
    }

    pub async fn get_users(&self, limit: Option<usize>) -> GatewayResult<Vec<User>> {
        self.client
            .fetch(QueryKey::Users(limit), || self.gateway.get_users(limit))
            .await
    }

    pub async fn get_user_by_id(&self, id: &UserId) -> GatewayResult<User> {
        self.client
            .fetch(QueryKey::UserById(id.clone()), || {
                self.gateway.get_user_by_id(id)
            })
            .await
    }

    pub async fn get_saved_posts(&self, user: &UserId) -> GatewayResult<Vec<Post>> {
        self.client
            .fetch(QueryKey::SavedPosts(user.clone()), || {
                self.gateway.get_saved_posts(user)
            })
            .await
    }

    // --- Mutations ---

    pub async fn create_user_account(&self, user: NewUser) -> GatewayResult<User> {
        self.client
            .mutate(&[KeyKind::Users.into()], || {
                self.gateway.create_user_account(user)
            })
            .await
    }

    pub async fn sign_in_account(&self, email: &str, password: &str) -> GatewayResult<Session> {
        self.client
            .mutate(&[KeyKind::CurrentUser.into()], || {
                self.gateway.sign_in_account(email, password)
            })
            .await
    }

    pub async fn sign_out_account(&self, token: &str) -> GatewayResult<()> {
        let result = self.gateway.sign_out_account(token).await;
        if result.is_ok() {
            self.client.clear();
        }
        result
    }

    pub async fn create_post(&self, post: NewPost) -> GatewayResult<Post> {
        let creator = post.creator.clone();
        self.client
            .mutate(
                &[
                    KeyKind::RecentPosts.into(),
                    KeyKind::InfinitePosts.into(),
                    QueryKey::UserPosts(creator).into(),
                ],
                || self.gateway.create_post(post),
            )
            .await
    }

    pub async fn update_post(&self, update: UpdatePost) -> GatewayResult<Post> {
        let views = post_views(&update.post_id);
        self.client
            .mutate(&views, || self.gateway.update_post(update))
            .await
    }

    pub async fn delete_post(&self, id: &PostId) -> GatewayResult<()> {
        let mut views = post_views(id);
        views.push(KeyKind::CurrentUser.into());
        self.client
            .mutate(&views, || self.gateway.delete_post(id))
            .await
    }

    pub async fn like_post(&self, id: &PostId, likes: &[UserId]) -> GatewayResult<Post> {
        let mut views = post_views(id);
        views.push(KeyKind::CurrentUser.into());
        self.client
            .mutate(&views, || self.gateway.like_post(id, likes))
            .await
    }

    pub async fn save_post(&self, user: &UserId, post: &PostId) -> GatewayResult<SavedPostRecord> {
        self.client
            .mutate(&save_views(user), || self.gateway.save_post(user, post))
            .await
    }

    pub async fn delete_saved_post(&self, user: &UserId, record: &RecordId) -> GatewayResult<()> {
        self.client
            .mutate(&save_views(user), || self.gateway.delete_saved_post(record))
            .await
    }

    /// Unsave by (user, post) when the record id is not known locally
    pub async fn unsave_post(&self, user: &UserId, post: &PostId) -> GatewayResult<()> {
        self.client
            .mutate(&save_views(user), || async {
                match self.gateway.find_saved_record(user, post).await? {
                    Some(record) => self.gateway.delete_saved_post(&record.id).await,
                    None => Ok(()),
                }
            })
            .await
    }

    pub async fn update_user(&self, update: UpdateUser) -> GatewayResult<User> {
        let id = update.user_id.clone();
        self.client
            .mutate(
                &[
                    KeyKind::CurrentUser.into(),
                    QueryKey::UserById(id).into(),
                    KeyKind::Users.into(),
                ],
                || self.gateway.update_user(update),
            )
            .await
    }
}

fn save_views(user: &UserId) -> Vec<KeyPattern> {
    vec![
        KeyKind::RecentPosts.into(),
        KeyKind::InfinitePosts.into(),
        KeyKind::CurrentUser.into(),
        QueryKey::SavedPosts(user.clone()).into(),
        QueryKey::UserById(user.clone()).into(),
    ]
}
