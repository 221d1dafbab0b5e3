// Typed entities decoded from backend documents
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::backend::Document;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Document id of a user profile
    UserId
);
id_type!(PostId);
id_type!(
    /// Id of a file held by the storage service
    FileId
);
id_type!(
    /// Document id of a saved-post join record
    RecordId
);
id_type!(AccountId);

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("{collection} document is missing field `{field}`")]
    MissingField {
        collection: String,
        field: &'static str,
    },

    #[error("{collection} document field `{field}` is not a {expected}")]
    InvalidField {
        collection: String,
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub account_id: AccountId,
    pub name: String,
    pub username: String,
    pub email: String,
    pub image_url: String,
    pub image_id: Option<FileId>,
    pub bio: Option<String>,
    /// Filled by the gateway from the saves collection
    pub saved: Vec<SavedPostRecord>,
}

impl User {
    pub fn saved_record_for(&self, post: &PostId) -> Option<&SavedPostRecord> {
        self.saved.iter().find(|record| &record.post == post)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub creator: UserId,
    pub caption: String,
    pub image_id: FileId,
    pub image_url: String,
    pub location: String,
    pub tags: Vec<String>,
    pub likes: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn cursor(&self) -> FeedCursor {
        FeedCursor {
            updated_at: self.updated_at,
            id: self.id.clone(),
        }
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.likes.contains(user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SavedPostRecord {
    pub id: RecordId,
    pub user: UserId,
    pub post: PostId,
}

/// Continuation point in the feed: the sort key of the last item seen.
///
/// Feeds are ordered newest `updated_at` first with ties broken by id
/// descending, so a cursor identifies a unique position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedCursor {
    pub updated_at: DateTime<Utc>,
    pub id: PostId,
}

impl FeedCursor {
    /// Whether `(updated_at, id)` sorts strictly after this cursor
    pub fn precedes(&self, updated_at: DateTime<Utc>, id: &str) -> bool {
        (updated_at, id) < (self.updated_at, self.id.as_str())
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.updated_at.timestamp_micros(), self.id)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid feed cursor: {0}")]
pub struct CursorParseError(String);

impl FromStr for FeedCursor {
    type Err = CursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (micros, id) = s
            .split_once('_')
            .ok_or_else(|| CursorParseError(s.to_string()))?;
        let micros: i64 = micros
            .parse()
            .map_err(|_| CursorParseError(s.to_string()))?;
        let updated_at = Utc
            .timestamp_micros(micros)
            .single()
            .ok_or_else(|| CursorParseError(s.to_string()))?;
        if id.is_empty() {
            return Err(CursorParseError(s.to_string()));
        }
        Ok(Self {
            updated_at,
            id: PostId::new(id),
        })
    }
}

/// One page of the infinite feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub posts: Vec<Post>,
    /// Terminal item's cursor; `None` for an empty page
    pub cursor: Option<FeedCursor>,
}

impl Page {
    pub fn new(posts: Vec<Post>) -> Self {
        let cursor = posts.last().map(Post::cursor);
        Self { posts, cursor }
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// A file selected for upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub creator: UserId,
    pub caption: String,
    pub file: Upload,
    pub location: String,
    /// Comma separated, as typed
    pub tags: String,
}

#[derive(Debug, Clone)]
pub struct UpdatePost {
    pub post_id: PostId,
    pub caption: String,
    pub location: String,
    pub tags: String,
    pub file: Option<Upload>,
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
    pub user_id: UserId,
    pub name: String,
    pub bio: Option<String>,
    pub file: Option<Upload>,
}

/// Split a comma separated tag string, dropping whitespace, empties and repeats.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',') {
        let tag: String = tag.chars().filter(|c| !c.is_whitespace()).collect();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Remove repeated user ids, keeping first occurrences in order.
pub fn dedup_likes(likes: &[UserId]) -> Vec<UserId> {
    let mut unique: Vec<UserId> = Vec::with_capacity(likes.len());
    for id in likes {
        if !unique.contains(id) {
            unique.push(id.clone());
        }
    }
    unique
}

// --- Decoding ---

struct Fields<'a> {
    collection: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(doc: &'a Document) -> Self {
        Self {
            collection: &doc.collection,
            map: &doc.fields,
        }
    }

    fn missing(&self, field: &'static str) -> DecodeError {
        DecodeError::MissingField {
            collection: self.collection.to_string(),
            field,
        }
    }

    fn invalid(&self, field: &'static str, expected: &'static str) -> DecodeError {
        DecodeError::InvalidField {
            collection: self.collection.to_string(),
            field,
            expected,
        }
    }

    fn string(&self, field: &'static str) -> Result<String, DecodeError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Err(self.missing(field)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(self.invalid(field, "string")),
        }
    }

    fn optional_string(&self, field: &'static str) -> Result<Option<String>, DecodeError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(field, "string")),
        }
    }

    fn string_list(&self, field: &'static str) -> Result<Vec<String>, DecodeError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(field, "list of strings"))
                })
                .collect(),
            Some(_) => Err(self.invalid(field, "list of strings")),
        }
    }
}

impl TryFrom<&Document> for Post {
    type Error = DecodeError;

    fn try_from(doc: &Document) -> Result<Self, Self::Error> {
        let fields = Fields::new(doc);
        let likes = fields
            .string_list("likes")?
            .into_iter()
            .map(UserId::new)
            .collect::<Vec<_>>();
        Ok(Post {
            id: PostId::new(doc.id.clone()),
            creator: UserId::new(fields.string("creator")?),
            caption: fields.string("caption")?,
            image_id: FileId::new(fields.string("image_id")?),
            image_url: fields.string("image_url")?,
            location: fields.optional_string("location")?.unwrap_or_default(),
            tags: fields.string_list("tags")?,
            likes: dedup_likes(&likes),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

impl TryFrom<&Document> for User {
    type Error = DecodeError;

    fn try_from(doc: &Document) -> Result<Self, Self::Error> {
        let fields = Fields::new(doc);
        Ok(User {
            id: UserId::new(doc.id.clone()),
            account_id: AccountId::new(fields.string("account_id")?),
            name: fields.string("name")?,
            username: fields.string("username")?,
            email: fields.string("email")?,
            image_url: fields.string("image_url")?,
            image_id: fields.optional_string("image_id")?.map(FileId::new),
            bio: fields.optional_string("bio")?,
            saved: Vec::new(),
        })
    }
}

impl TryFrom<&Document> for SavedPostRecord {
    type Error = DecodeError;

    fn try_from(doc: &Document) -> Result<Self, Self::Error> {
        let fields = Fields::new(doc);
        Ok(SavedPostRecord {
            id: RecordId::new(doc.id.clone()),
            user: UserId::new(fields.string("user")?),
            post: PostId::new(fields.string("post")?),
        })
    }
}

/// Decode every document, failing on the first malformed one.
pub fn decode_all<T>(docs: &[Document]) -> Result<Vec<T>, DecodeError>
where
    T: for<'a> TryFrom<&'a Document, Error = DecodeError>,
{
    docs.iter().map(T::try_from).collect()
}
