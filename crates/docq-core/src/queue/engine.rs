//! The queue engine: lease-based delivery on top of a `DocumentStore`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::expiry::{self, ExpiryStrategy};
use super::indexes;
use super::options::{DequeueOptions, QueueOptions};
use super::partition::PartitionLocks;
use crate::codec::{self, Payload};
use crate::domain::{Message, MessageId, unlocked};
use crate::error::QueueError;
use crate::observability::QueueCounts;
use crate::ports::{Clock, Document, DocumentStore, Field, Filter, StoreError, SystemClock, Update};

/// A queue of `Message<T>` stored in `S`.
///
/// Cheap to clone; clones share the store, the clock and the partition lock
/// registry.
///
/// Concurrency:
/// - `dequeue` is a single atomic find-and-modify and takes no lock.
/// - `dequeue_batch` and `dequeue_stream` read candidates and then lease them
///   in a second store call. They hold the partition's lock across both calls,
///   which only serializes callers sharing this registry.
/// - Everything else is a single store call relying on store atomicity.
pub struct Queue<T, S> {
    pub(super) store: Arc<S>,
    pub(super) options: QueueOptions,
    pub(super) expiry: Arc<dyn ExpiryStrategy>,
    pub(super) partitions: Arc<PartitionLocks>,
    pub(super) clock: Arc<dyn Clock>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S> Clone for Queue<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options.clone(),
            expiry: Arc::clone(&self.expiry),
            partitions: Arc::clone(&self.partitions),
            clock: Arc::clone(&self.clock),
            _payload: PhantomData,
        }
    }
}

/// Builds a `Queue`, validating options and provisioning indexes on `open`.
///
/// ```ignore
/// let queue = QueueBuilder::new(store)
///     .max_delivery_count(5)
///     .lock_duration(Duration::from_secs(30))
///     .expire_after(Duration::from_secs(3600))
///     .open::<MyPayload>()
///     .await?;
/// ```
pub struct QueueBuilder<S> {
    store: Arc<S>,
    options: QueueOptions,
    clock: Option<Arc<dyn Clock>>,
    partitions: Option<Arc<PartitionLocks>>,
}

impl<S: DocumentStore> QueueBuilder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            options: QueueOptions::default(),
            clock: None,
            partitions: None,
        }
    }

    pub fn options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_delivery_count(mut self, max_delivery_count: u32) -> Self {
        self.options.max_delivery_count = max_delivery_count;
        self
    }

    pub fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.options.lock_duration = lock_duration;
        self
    }

    pub fn expire_after(mut self, expire_after: Duration) -> Self {
        self.options.expire_after = Some(expire_after);
        self
    }

    pub fn cosmos_db_compatibility(mut self, enabled: bool) -> Self {
        self.options.cosmos_db_compatibility = enabled;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a lock registry with other queues of this process.
    pub fn partition_locks(mut self, partitions: Arc<PartitionLocks>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Validate options, create missing indexes and return the queue.
    pub async fn open<T: Payload>(self) -> Result<Queue<T, S>, QueueError> {
        self.options.validate()?;
        let expiry = expiry::strategy_for(&self.options);
        indexes::ensure_indexes(self.store.as_ref(), expiry.as_ref()).await?;

        Ok(Queue {
            store: self.store,
            options: self.options,
            expiry,
            partitions: self.partitions.unwrap_or_default(),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            _payload: PhantomData,
        })
    }
}

impl<T: Payload, S: DocumentStore> Queue<T, S> {
    /// Open with `options`, the system clock and a private lock registry.
    pub async fn open(store: Arc<S>, options: QueueOptions) -> Result<Self, QueueError> {
        QueueBuilder::new(store).options(options).open().await
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn partition_locks(&self) -> &Arc<PartitionLocks> {
        &self.partitions
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert a message. `Ok(false)` if its id is already stored; the stored
    /// message is left untouched in that case.
    pub async fn enqueue(&self, message: Message<T>) -> Result<bool, QueueError> {
        let document = codec::encode(message)?;
        let id = document.id.clone();
        let partition = document.partition_key.clone();

        match self.store.insert_one(document).await {
            Ok(()) => {
                debug!(%id, ?partition, "message enqueued");
                Ok(true)
            }
            Err(StoreError::DuplicateKey(_)) => {
                debug!(%id, ?partition, "duplicate message ignored");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lease the oldest eligible message of the requested partition.
    ///
    /// One atomic store call; safe across processes without any lock.
    pub async fn dequeue(
        &self,
        options: &DequeueOptions,
    ) -> Result<Option<Message<T>>, QueueError> {
        options.check_cancelled()?;
        let now = self.now();
        let filter = self.eligible(options.partition_key.as_deref(), now);
        let update = self.lease_update(now, options.auto_complete)?;

        let Some(document) = self
            .store
            .find_one_and_update(&filter, Some(Field::Created), &update)
            .await?
        else {
            return Ok(None);
        };

        debug!(
            id = %document.id,
            partition = ?options.partition_key,
            delivery_count = document.delivery_count,
            "message leased"
        );
        // decoded after leasing, so an unreadable body still counts toward poisoning
        Ok(Some(codec::decode(document)?))
    }

    /// Lease up to `options.count` eligible messages, oldest first.
    ///
    /// Holds the partition lock across the candidate read and the lease update.
    /// The update is not atomic as a set and another process may lease the same
    /// candidates in between; delivery stays at-least-once.
    pub async fn dequeue_batch(
        &self,
        options: &DequeueOptions,
    ) -> Result<Vec<Message<T>>, QueueError> {
        options.check_cancelled()?;
        let _guard = tokio::select! {
            guard = self.partitions.acquire(options.partition_key.as_deref()) => guard,
            _ = options.cancel.cancelled() => return Err(QueueError::Cancelled),
        };
        self.lease_page(options).await
    }

    /// Read-then-lease of one page. Callers hold the partition lock.
    pub(super) async fn lease_page(
        &self,
        options: &DequeueOptions,
    ) -> Result<Vec<Message<T>>, QueueError> {
        options.check_cancelled()?;
        let now = self.now();
        let filter = self.eligible(options.partition_key.as_deref(), now);
        let candidates = self
            .store
            .find(&filter, Some(Field::Created), Some(options.count))
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        options.check_cancelled()?;
        let update = self.lease_update(now, options.auto_complete)?;
        let ids = candidates.iter().map(|document| document.id.clone());
        let result = self.store.update_many(&Filter::ids(ids), &update).await?;

        debug!(
            partition = ?options.partition_key,
            candidates = candidates.len(),
            modified = result.modified,
            auto_complete = options.auto_complete,
            "batch leased"
        );

        // local copies reflect the update; no re-read
        candidates
            .into_iter()
            .map(|mut document| {
                update.apply(&mut document);
                codec::decode(document)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(QueueError::from)
    }

    /// Eligible messages as `dequeue_batch` would see them, without leasing.
    pub async fn peek(&self, options: &DequeueOptions) -> Result<Vec<Message<T>>, QueueError> {
        options.check_cancelled()?;
        let filter = self.eligible(options.partition_key.as_deref(), self.now());
        let documents = self
            .store
            .find(&filter, Some(Field::Created), Some(options.count))
            .await?;
        debug!(partition = ?options.partition_key, found = documents.len(), "peek");
        decode_all(documents)
    }

    /// Mark a message completed now. Unknown or already completed ids are a
    /// silent success. Returns whether the store acknowledged the write.
    pub async fn complete(&self, message: &Message<T>) -> Result<bool, QueueError> {
        self.complete_many(std::slice::from_ref(message)).await
    }

    pub async fn complete_many(&self, messages: &[Message<T>]) -> Result<bool, QueueError> {
        if messages.is_empty() {
            return Ok(true);
        }
        let mut update = Update::new().completed(Some(self.now()));
        self.expiry.arm_expiry(&mut update);

        let result = self
            .store
            .update_many(&Filter::ids(ids_of(messages)), &update)
            .await?;
        debug!(requested = messages.len(), matched = result.matched, "messages completed");
        Ok(result.acknowledged)
    }

    /// Return a message to the queue.
    ///
    /// Clears the lease and `Completed` (undoing an auto-complete), cancels a
    /// pending expiry and persists `message.scheduled_enqueue_time` as the next
    /// delivery time. `DeliveryCount` is left alone.
    pub async fn fail(&self, message: &Message<T>) -> Result<bool, QueueError> {
        let mut update = Update::new()
            .locked_until(unlocked())
            .scheduled_enqueue_time(message.scheduled_enqueue_time)
            .completed(None);
        self.expiry.disarm_expiry(&mut update);

        let result = self
            .store
            .update_many(&Filter::ids([message.id.clone()]), &update)
            .await?;
        debug!(
            id = %message.id,
            delivery_count = message.delivery_count,
            scheduled = %message.scheduled_enqueue_time,
            matched = result.matched,
            "message failed"
        );
        Ok(result.acknowledged)
    }

    /// Remove a message whatever its state.
    pub async fn delete(&self, message: &Message<T>) -> Result<bool, QueueError> {
        self.delete_many(std::slice::from_ref(message)).await
    }

    pub async fn delete_many(&self, messages: &[Message<T>]) -> Result<bool, QueueError> {
        if messages.is_empty() {
            return Ok(true);
        }
        let result = self
            .store
            .delete_many(&Filter::ids(ids_of(messages)))
            .await?;
        debug!(requested = messages.len(), deleted = result.deleted, "messages deleted");
        Ok(result.acknowledged)
    }

    /// Read one message by id without touching it.
    pub async fn get(&self, id: &MessageId) -> Result<Option<Message<T>>, QueueError> {
        let documents = self
            .store
            .find(&Filter::ids([id.clone()]), None, Some(1))
            .await?;
        Ok(decode_all(documents)?.into_iter().next())
    }

    /// Poisoned messages, oldest first, for callers doing dead-letter handling.
    pub async fn find_poisoned(&self, limit: usize) -> Result<Vec<Message<T>>, QueueError> {
        let filter = Filter::Poisoned {
            now: self.now(),
            max_delivery_count: self.options.max_delivery_count,
        };
        let documents = self
            .store
            .find(&filter, Some(Field::Created), Some(limit))
            .await?;
        decode_all(documents)
    }

    /// Count stored messages per state. Reads the whole collection.
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let documents = self.store.find(&Filter::All, None, None).await?;
        Ok(QueueCounts::tally(
            &documents,
            self.now(),
            self.options.max_delivery_count,
        ))
    }

    fn eligible(&self, partition_key: Option<&str>, now: DateTime<Utc>) -> Filter {
        Filter::Eligible {
            now,
            max_delivery_count: self.options.max_delivery_count,
            partition_key: partition_key.map(str::to_string),
        }
    }

    fn lease_update(&self, now: DateTime<Utc>, auto_complete: bool) -> Result<Update, QueueError> {
        let lock_duration = self.options.lock_duration;
        let locked_until = chrono::Duration::from_std(lock_duration)
            .ok()
            .and_then(|lock| now.checked_add_signed(lock))
            .ok_or_else(|| {
                QueueError::InvalidOptions(format!(
                    "lock_duration {lock_duration:?} overflows the lease timestamp"
                ))
            })?;
        let mut update = Update::new()
            .locked_until(locked_until)
            .increment_delivery_count();
        if auto_complete {
            update = update.completed(Some(now));
            self.expiry.arm_expiry(&mut update);
        }
        Ok(update)
    }
}

fn ids_of<T>(messages: &[Message<T>]) -> Vec<MessageId> {
    messages.iter().map(|message| message.id.clone()).collect()
}

fn decode_all<T: Payload>(documents: Vec<Document>) -> Result<Vec<Message<T>>, QueueError> {
    documents
        .into_iter()
        .map(codec::decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(QueueError::from)
}
