use std::fmt;

use crate::model::{PostId, UserId};

/// Identity of a cached query: operation plus its parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    RecentPosts,
    InfinitePosts,
    SearchPosts(String),
    PostById(PostId),
    UserPosts(UserId),
    CurrentUser,
    /// Optional result limit
    Users(Option<usize>),
    UserById(UserId),
    SavedPosts(UserId),
}

/// Operation name without parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    RecentPosts,
    InfinitePosts,
    SearchPosts,
    PostById,
    UserPosts,
    CurrentUser,
    Users,
    UserById,
    SavedPosts,
}

impl QueryKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            QueryKey::RecentPosts => KeyKind::RecentPosts,
            QueryKey::InfinitePosts => KeyKind::InfinitePosts,
            QueryKey::SearchPosts(_) => KeyKind::SearchPosts,
            QueryKey::PostById(_) => KeyKind::PostById,
            QueryKey::UserPosts(_) => KeyKind::UserPosts,
            QueryKey::CurrentUser => KeyKind::CurrentUser,
            QueryKey::Users(_) => KeyKind::Users,
            QueryKey::UserById(_) => KeyKind::UserById,
            QueryKey::SavedPosts(_) => KeyKind::SavedPosts,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::RecentPosts => write!(f, "getRecentPosts"),
            QueryKey::InfinitePosts => write!(f, "getInfinitePosts"),
            QueryKey::SearchPosts(term) => write!(f, "searchPosts:{term}"),
            QueryKey::PostById(id) => write!(f, "getPostById:{id}"),
            QueryKey::UserPosts(id) => write!(f, "getUserPosts:{id}"),
            QueryKey::CurrentUser => write!(f, "getCurrentUser"),
            QueryKey::Users(None) => write!(f, "getUsers"),
            QueryKey::Users(Some(limit)) => write!(f, "getUsers:{limit}"),
            QueryKey::UserById(id) => write!(f, "getUserById:{id}"),
            QueryKey::SavedPosts(id) => write!(f, "getSavedPosts:{id}"),
        }
    }
}

/// Which cache entries a successful mutation invalidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Exact(QueryKey),
    /// Every entry of this operation, whatever its parameters
    Kind(KeyKind),
}

impl KeyPattern {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Kind(kind) => key.kind() == *kind,
        }
    }
}

impl From<QueryKey> for KeyPattern {
    fn from(key: QueryKey) -> Self {
        KeyPattern::Exact(key)
    }
}

impl From<KeyKind> for KeyPattern {
    fn from(kind: KeyKind) -> Self {
        KeyPattern::Kind(kind)
    }
}
