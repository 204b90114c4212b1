//! In-memory document store.
//!
//! A complete `DocumentStore` for tests, demos and single-process use. All
//! documents live behind one async mutex, so every operation (including the
//! multi-document ones) is atomic here; the engine does not rely on that.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::MessageId;
use crate::ports::{
    Clock, DeleteResult, Document, DocumentStore, Field, Filter, IndexSpec, StoreError,
    SystemClock, Update, UpdateResult,
};

/// A stored document plus store-managed metadata.
#[derive(Debug, Clone)]
struct Entry {
    doc: Document,
    /// Insertion order; breaks ties when sorting.
    seq: u64,
    /// Last write time (the `_ts` of CosmosDB).
    modified_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    docs: HashMap<MessageId, Entry>,
    indexes: Vec<IndexSpec>,
    next_seq: u64,
    /// Errors handed out to the next operations, oldest first.
    injected_failures: VecDeque<String>,
}

impl StoreState {
    fn take_injected_failure(&mut self) -> Result<(), StoreError> {
        match self.injected_failures.pop_front() {
            Some(reason) => Err(StoreError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    /// Ids of matching documents, ascending on `sort` then insertion order.
    fn matching_ids(&self, filter: &Filter, sort: Option<Field>) -> Vec<MessageId> {
        let mut entries: Vec<&Entry> = self
            .docs
            .values()
            .filter(|entry| filter.matches(&entry.doc))
            .collect();
        entries.sort_by(|a, b| {
            sort.map(|field| field.compare(&a.doc, &b.doc))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.doc.id.clone()).collect()
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        self.indexes.iter().any(|index| {
            let Some(default_ttl) = index.expire_after_seconds else {
                return false;
            };
            match index.keys.as_slice() {
                [Field::Completed] => entry
                    .doc
                    .completed
                    .is_some_and(|completed| expired_by(completed, default_ttl, now)),
                [Field::StoreTimestamp] => {
                    let ttl = entry.doc.ttl.unwrap_or(default_ttl);
                    expired_by(entry.modified_at, ttl, now)
                }
                _ => false,
            }
        })
    }
}

/// `since + ttl_secs <= now`. A negative ttl never expires, nor does one past
/// the last representable timestamp.
fn expired_by(since: DateTime<Utc>, ttl_secs: i64, now: DateTime<Utc>) -> bool {
    ttl_secs >= 0
        && Duration::try_seconds(ttl_secs)
            .and_then(|ttl| since.checked_add_signed(ttl))
            .is_some_and(|at| at <= now)
}

/// In-memory `DocumentStore`.
pub struct InMemoryDocumentStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` for store-managed timestamps and the expiry sweep.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
        }
    }

    /// Make the next operation fail with `StoreError::Unavailable(reason)`.
    /// Calls stack: each queued failure is consumed by one operation.
    pub async fn fail_next(&self, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .injected_failures
            .push_back(reason.into());
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw stored document, bypassing filters.
    pub async fn get(&self, id: &MessageId) -> Option<Document> {
        self.state
            .lock()
            .await
            .docs
            .get(id)
            .map(|entry| entry.doc.clone())
    }

    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.state.lock().await.indexes.clone()
    }

    /// One pass of the background expiry sweep a real store runs on its own.
    /// Returns the number of documents removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let expired: Vec<MessageId> = state
            .docs
            .values()
            .filter(|entry| state.is_expired(entry, now))
            .map(|entry| entry.doc.id.clone())
            .collect();
        for id in &expired {
            state.docs.remove(id);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expired documents purged");
        }
        expired.len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert_one(&self, doc: Document) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;

        if state.docs.contains_key(&doc.id) {
            return Err(StoreError::DuplicateKey(doc.id));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.docs.insert(
            doc.id.clone(),
            Entry {
                doc,
                seq,
                modified_at: now,
            },
        );
        Ok(())
    }

    async fn find(
        &self,
        filter: &Filter,
        sort: Option<Field>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;

        let ids = state.matching_ids(filter, sort);
        let limit = limit.unwrap_or(ids.len());
        Ok(ids
            .iter()
            .take(limit)
            .filter_map(|id| state.docs.get(id).map(|entry| entry.doc.clone()))
            .collect())
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        sort: Option<Field>,
        update: &Update,
    ) -> Result<Option<Document>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;

        let Some(id) = state.matching_ids(filter, sort).into_iter().next() else {
            return Ok(None);
        };
        let Some(entry) = state.docs.get_mut(&id) else {
            return Ok(None);
        };
        update.apply(&mut entry.doc);
        entry.modified_at = now;
        Ok(Some(entry.doc.clone()))
    }

    async fn update_many(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;

        let mut result = UpdateResult {
            acknowledged: true,
            ..UpdateResult::default()
        };
        for id in state.matching_ids(filter, None) {
            let Some(entry) = state.docs.get_mut(&id) else {
                continue;
            };
            result.matched += 1;
            let before = entry.doc.clone();
            update.apply(&mut entry.doc);
            if entry.doc != before {
                result.modified += 1;
                entry.modified_at = now;
            }
        }
        Ok(result)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, StoreError> {
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;

        let ids = state.matching_ids(filter, None);
        for id in &ids {
            state.docs.remove(id);
        }
        Ok(DeleteResult {
            acknowledged: true,
            deleted: ids.len() as u64,
        })
    }

    async fn index_names(&self) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;
        Ok(state.indexes.iter().map(|index| index.name.clone()).collect())
    }

    async fn create_index(&self, index: IndexSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_injected_failure()?;

        if state.indexes.iter().all(|existing| existing.name != index.name) {
            state.indexes.push(index);
        }
        Ok(())
    }
}
