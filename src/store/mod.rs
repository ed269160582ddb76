//! Real-time document store seam.
//!
//! Documents are flat: every field is a scalar. Nested values (page lists,
//! character references) are serialized to a text field by their owners.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::model::AuthorId;

pub mod memory;

pub type Fields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// Full membership of a collection at one instant, ordered by document id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

/// Every item is a complete snapshot; an `Err` ends the stream.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_string())
    }

    pub fn book_requests() -> Self {
        Self::new("bookRequests")
    }

    pub fn authors() -> Self {
        Self::new("magicAccounts")
    }

    pub fn characters(author: &AuthorId) -> Self {
        Self(format!("magicAccounts/{author}/characters"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("document already exists: {path}/{id}")]
    AlreadyExists { path: CollectionPath, id: String },
    #[error("document not found: {path}/{id}")]
    NotFound { path: CollectionPath, id: String },
    #[error("document is too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid nested entity in field `{field}`")]
    NestedField { field: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// True when the write was refused because of the document size limit,
    /// including backends that only report it as a message.
    pub fn is_size_limit(&self) -> bool {
        match self {
            Self::TooLarge { .. } => true,
            Self::Backend(message) => message.to_ascii_lowercase().contains("too large"),
            _ => false,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Fields>, StoreError>;

    /// Creates the document only if `id` is free.
    async fn create(
        &self,
        path: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError>;

    /// Creates a document under a generated id and returns the id.
    async fn add(&self, path: &CollectionPath, fields: Fields) -> Result<String, StoreError>;

    /// Merges `fields` into an existing document in one atomic write.
    async fn update(
        &self,
        path: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError>;

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<(), StoreError>;

    /// Opens a server-push subscription. The current snapshot is delivered
    /// first, then a new one after every change. Dropping the stream
    /// unsubscribes.
    fn subscribe(&self, path: &CollectionPath) -> SnapshotStream;
}
