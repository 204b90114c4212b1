//! DocumentStore port - the collection a queue lives in.
//!
//! The queue engine owns no storage. It talks to a document collection through
//! this trait, expressing every read and write with the small vocabulary below
//! (`Filter`, `Update`, `Field`, `IndexSpec`). A MongoDB-style store maps these
//! one-to-one onto its query and update documents; `InMemoryDocumentStore`
//! evaluates them directly.
//!
//! Required store guarantees:
//! - `insert_one` enforces uniqueness of `_id` and reports `DuplicateKey`.
//! - `find_one_and_update` is atomic per document and returns the new value.
//! - `update_many` / `delete_many` are atomic per document only.
//! - `create_index` with an expiry makes the store remove documents on its own.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Message, MessageId};

/// A message as persisted: the body is kept as an opaque JSON value.
pub type Document = Message<serde_json::Value>;

/// Store-level failures. All of them are infrastructure errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint on `_id` violated.
    #[error("duplicate key: {0}")]
    DuplicateKey(MessageId),

    /// Network failure, timeout, lost write concern...
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Document fields the engine filters, sorts, updates or indexes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    DeliveryCount,
    LockedUntil,
    ScheduledEnqueueTime,
    Completed,
    Created,
    PartitionKey,
    Ttl,
    /// Store-managed last-modified timestamp (CosmosDB `_ts`). Not part of `Message`.
    StoreTimestamp,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::DeliveryCount => "DeliveryCount",
            Field::LockedUntil => "LockedUntil",
            Field::ScheduledEnqueueTime => "ScheduledEnqueueTime",
            Field::Completed => "Completed",
            Field::Created => "Created",
            Field::PartitionKey => "PartitionKey",
            Field::Ttl => "ttl",
            Field::StoreTimestamp => "_ts",
        }
    }

    /// Ascending order of two documents on this field.
    ///
    /// `None` sorts before any value, as in MongoDB. `StoreTimestamp` lives
    /// outside the document and compares equal here.
    pub fn compare<T>(self, a: &Message<T>, b: &Message<T>) -> Ordering {
        match self {
            Field::Id => a.id.cmp(&b.id),
            Field::DeliveryCount => a.delivery_count.cmp(&b.delivery_count),
            Field::LockedUntil => a.locked_until.cmp(&b.locked_until),
            Field::ScheduledEnqueueTime => a.scheduled_enqueue_time.cmp(&b.scheduled_enqueue_time),
            Field::Completed => a.completed.cmp(&b.completed),
            Field::Created => a.created.cmp(&b.created),
            Field::PartitionKey => a.partition_key.cmp(&b.partition_key),
            Field::Ttl => a.ttl.cmp(&b.ttl),
            Field::StoreTimestamp => Ordering::Equal,
        }
    }
}

/// Which documents an operation targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,

    /// `_id ∈ ids`.
    Ids(Vec<MessageId>),

    /// The dequeue eligibility predicate:
    /// `DeliveryCount < max ∧ LockedUntil ≤ now ∧ ScheduledEnqueueTime ≤ now
    ///  ∧ Completed = null ∧ PartitionKey = partition_key`.
    ///
    /// `partition_key: None` matches only documents without a key.
    Eligible {
        now: DateTime<Utc>,
        max_delivery_count: u32,
        partition_key: Option<String>,
    },

    /// Not completed, not leased, and out of delivery attempts.
    Poisoned {
        now: DateTime<Utc>,
        max_delivery_count: u32,
    },
}

impl Filter {
    pub fn ids(ids: impl IntoIterator<Item = MessageId>) -> Self {
        Filter::Ids(ids.into_iter().collect())
    }

    pub fn matches<T>(&self, doc: &Message<T>) -> bool {
        match self {
            Filter::All => true,
            Filter::Ids(ids) => ids.contains(&doc.id),
            Filter::Eligible {
                now,
                max_delivery_count,
                partition_key,
            } => {
                doc.delivery_count < *max_delivery_count
                    && doc.locked_until <= *now
                    && doc.scheduled_enqueue_time <= *now
                    && doc.completed.is_none()
                    && doc.partition_key == *partition_key
            }
            Filter::Poisoned {
                now,
                max_delivery_count,
            } => {
                doc.completed.is_none()
                    && doc.locked_until <= *now
                    && doc.delivery_count >= *max_delivery_count
            }
        }
    }
}

/// A field-level update (`$set` / `$inc`). Unset parts leave the field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set_locked_until: Option<DateTime<Utc>>,
    pub set_scheduled_enqueue_time: Option<DateTime<Utc>>,
    /// `Some(None)` clears `Completed`.
    pub set_completed: Option<Option<DateTime<Utc>>>,
    /// `Some(None)` removes the TTL hint.
    pub set_ttl: Option<Option<i64>>,
    pub inc_delivery_count: u32,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked_until(mut self, at: DateTime<Utc>) -> Self {
        self.set_locked_until = Some(at);
        self
    }

    pub fn scheduled_enqueue_time(mut self, at: DateTime<Utc>) -> Self {
        self.set_scheduled_enqueue_time = Some(at);
        self
    }

    pub fn completed(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.set_completed = Some(at);
        self
    }

    pub fn ttl(mut self, ttl: Option<i64>) -> Self {
        self.set_ttl = Some(ttl);
        self
    }

    pub fn increment_delivery_count(mut self) -> Self {
        self.inc_delivery_count += 1;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply this update to a document (or to a local copy of one).
    pub fn apply<T>(&self, doc: &mut Message<T>) {
        if let Some(at) = self.set_locked_until {
            doc.locked_until = at;
        }
        if let Some(at) = self.set_scheduled_enqueue_time {
            doc.scheduled_enqueue_time = at;
        }
        if let Some(completed) = self.set_completed {
            doc.completed = completed;
        }
        if let Some(ttl) = self.set_ttl {
            doc.ttl = ttl;
        }
        doc.delivery_count = doc.delivery_count.saturating_add(self.inc_delivery_count);
    }
}

/// Ascending index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<Field>,
    /// Expiry in seconds after the (single) indexed timestamp.
    /// `Some(-1)` means "no collection default, per-document `ttl` only".
    pub expire_after_seconds: Option<i64>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, keys: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            keys,
            expire_after_seconds: None,
        }
    }

    pub fn expire_after_seconds(mut self, seconds: i64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document; `DuplicateKey` if `_id` already exists.
    async fn insert_one(&self, doc: Document) -> Result<(), StoreError>;

    /// Read matching documents, ascending on `sort`, at most `limit`.
    async fn find(
        &self,
        filter: &Filter,
        sort: Option<Field>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Atomically update the first match (by `sort`) and return its new value.
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        sort: Option<Field>,
        update: &Update,
    ) -> Result<Option<Document>, StoreError>;

    async fn update_many(&self, filter: &Filter, update: &Update)
    -> Result<UpdateResult, StoreError>;

    async fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, StoreError>;

    async fn index_names(&self) -> Result<Vec<String>, StoreError>;

    async fn create_index(&self, index: IndexSpec) -> Result<(), StoreError>;
}
