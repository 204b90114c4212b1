use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::*;
use crate::domain::{Message, MessageId, unlocked};
use crate::error::QueueError;
use crate::impls::InMemoryDocumentStore;
use crate::observability::QueueCounts;
use crate::ports::{DocumentStore, Field, Filter, ManualClock, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    n: u32,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryDocumentStore>,
    queue: Queue<Job, InMemoryDocumentStore>,
}

impl Harness {
    async fn open(options: QueueOptions) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(InMemoryDocumentStore::with_clock(clock.clone()));
        let queue = QueueBuilder::new(store.clone())
            .options(options)
            .clock(clock.clone())
            .open()
            .await
            .unwrap();
        Self {
            clock,
            store,
            queue,
        }
    }

    async fn standard() -> Self {
        Self::open(QueueOptions::new(5, Duration::from_secs(30))).await
    }

    /// A message created "now"; the clock then moves 1ms so Created values differ.
    fn message(&self, n: u32) -> Message<Job> {
        let message = Message::new_at(Job { n }, self.queue.now());
        self.clock.advance(Duration::from_millis(1));
        message
    }

    async fn enqueue(&self, n: u32) -> Message<Job> {
        let message = self.message(n);
        assert!(self.queue.enqueue(message.clone()).await.unwrap());
        message
    }

    async fn stored(&self, message: &Message<Job>) -> Message<Job> {
        self.queue.get(&message.id).await.unwrap().unwrap()
    }
}

fn numbers(messages: &[Message<Job>]) -> Vec<u32> {
    messages.iter().map(|message| message.body.n).collect()
}

#[tokio::test]
async fn duplicate_enqueue_keeps_first_document() {
    let h = Harness::standard().await;

    let first = h.message(1).with_id("order-42");
    let second = h.message(2).with_id("order-42");

    assert!(h.queue.enqueue(first.clone()).await.unwrap());
    assert!(!h.queue.enqueue(second).await.unwrap());

    assert_eq!(h.stored(&first).await, first);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn derived_ids_deduplicate_equal_bodies() {
    let h = Harness::standard().await;
    let body = Job { n: 7 };
    let id = MessageId::derive_from(&body).unwrap();

    let first = Message::new_at(body.clone(), h.queue.now()).with_id(id.clone());
    let again = Message::new_at(body, h.queue.now()).with_id(id);

    assert!(h.queue.enqueue(first).await.unwrap());
    assert!(!h.queue.enqueue(again).await.unwrap());
}

#[tokio::test]
async fn single_dequeue_follows_created_order() {
    let h = Harness::standard().await;
    // inserted newest first
    for (n, offset) in [(3, 30), (1, 10), (2, 20)] {
        let message = Message::new_at(Job { n }, start() - secs(100 - offset));
        h.queue.enqueue(message).await.unwrap();
    }

    let mut seen = Vec::new();
    while let Some(message) = h.queue.dequeue(&DequeueOptions::new()).await.unwrap() {
        seen.push(message.body.n);
    }
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn lease_hides_message_until_lock_expires() {
    let h = Harness::standard().await;
    let enqueued = h.enqueue(1).await;

    let leased = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(leased.id, enqueued.id);
    assert_eq!(leased.delivery_count, 1);
    assert_eq!(leased.locked_until, h.queue.now() + secs(30));

    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_none());

    h.clock.advance(Duration::from_secs(29));
    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_none());

    h.clock.advance(Duration::from_secs(1));
    let again = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(again.delivery_count, leased.delivery_count + 1);
}

#[tokio::test]
async fn zero_lock_duration_hides_nothing() {
    let h = Harness::open(QueueOptions::new(5, Duration::ZERO)).await;
    h.enqueue(1).await;

    let first = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(first.locked_until, h.queue.now());

    let second = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(second.delivery_count, 2);
}

#[tokio::test]
async fn fail_dequeue_cycle_poisons_after_max_deliveries() {
    let h = Harness::open(QueueOptions::new(3, Duration::from_millis(100))).await;
    let enqueued = h.enqueue(1).await;
    let next = DequeueOptions::new();

    let leased = h.queue.dequeue(&next).await.unwrap().unwrap();
    assert_eq!(leased.delivery_count, 1);
    assert!(h.queue.fail(&leased).await.unwrap());

    // fail cleared the lease, so no waiting
    let leased = h.queue.dequeue(&next).await.unwrap().unwrap();
    assert_eq!(leased.delivery_count, 2);

    h.clock.advance(Duration::from_millis(100));
    h.queue.fail(&leased).await.unwrap();
    let leased = h.queue.dequeue(&next).await.unwrap().unwrap();
    assert_eq!(leased.delivery_count, 3);

    h.queue.fail(&leased).await.unwrap();
    assert!(h.queue.dequeue(&next).await.unwrap().is_none());
    assert!(h.queue.peek(&next).await.unwrap().is_empty());

    // poisoned messages stay until deleted
    let stored = h.stored(&enqueued).await;
    assert_eq!(stored.delivery_count, 3);
    assert!(stored.is_poisoned(3));

    assert!(h.queue.delete(&stored).await.unwrap());
    let remaining = h.store.find(&Filter::All, None, None).await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn repeated_fail_does_not_count_as_delivery() {
    let h = Harness::open(QueueOptions::new(2, Duration::from_secs(30))).await;
    h.enqueue(1).await;

    let leased = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    for _ in 0..5 {
        h.queue.fail(&leased).await.unwrap();
    }

    let again = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(again.delivery_count, 2);
}

#[tokio::test]
async fn complete_stamps_time_and_excludes_message() {
    let h = Harness::standard().await;
    let enqueued = h.enqueue(1).await;
    let leased = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();

    h.clock.advance(Duration::from_secs(5));
    let invoked = h.queue.now();
    assert!(h.queue.complete(&leased).await.unwrap());

    let stored = h.stored(&enqueued).await;
    let completed = stored.completed.unwrap();
    assert!(completed >= invoked);
    assert!(completed >= stored.created);

    h.clock.advance(Duration::from_secs(60));
    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_none());
    assert!(h.queue.peek(&DequeueOptions::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn complete_without_lease_or_document_is_silent() {
    let h = Harness::standard().await;
    let pending = h.enqueue(1).await;
    let unknown = h.message(2);

    assert!(h.queue.complete(&pending).await.unwrap());
    assert!(h.queue.complete(&pending).await.unwrap());
    assert!(h.queue.complete(&unknown).await.unwrap());
    assert!(h.queue.complete_many(&[]).await.unwrap());
    assert!(h.queue.delete(&unknown).await.unwrap());

    assert!(h.stored(&pending).await.is_completed());
}

#[tokio::test]
async fn fail_reverts_optimistic_completion_and_applies_schedule() {
    let h = Harness::standard().await;
    let enqueued = h.enqueue(1).await;

    let options = DequeueOptions::new().auto_complete(true);
    let mut leased = h.queue.dequeue(&options).await.unwrap().unwrap();
    assert_eq!(leased.completed, Some(h.queue.now()));
    assert!(h.stored(&enqueued).await.is_completed());

    leased.scheduled_enqueue_time = h.queue.now() + secs(10);
    assert!(h.queue.fail(&leased).await.unwrap());

    let stored = h.stored(&enqueued).await;
    assert_eq!(stored.completed, None);
    assert_eq!(stored.locked_until, unlocked());
    assert_eq!(stored.scheduled_enqueue_time, leased.scheduled_enqueue_time);

    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_none());
    h.clock.advance(Duration::from_secs(10));
    let again = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(again.delivery_count, 2);
}

#[tokio::test]
async fn retry_policy_schedules_next_delivery() {
    let h = Harness::standard().await;
    h.enqueue(1).await;
    let policy = RetryPolicy::new(Duration::from_secs(2), 2.0);

    let mut leased = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    leased.schedule_retry(&policy, h.queue.now());
    h.queue.fail(&leased).await.unwrap();

    h.clock.advance(Duration::from_millis(1999));
    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_none());
    h.clock.advance(Duration::from_millis(1));
    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_some());
}

#[tokio::test]
async fn scheduled_message_waits_for_its_time() {
    let h = Harness::standard().await;
    let later = h.message(1).scheduled_at(start() + secs(60));
    h.queue.enqueue(later).await.unwrap();

    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_none());
    h.clock.set(start() + secs(60));
    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_some());
}

#[tokio::test]
async fn peek_is_read_only_and_matches_next_batch() {
    let h = Harness::standard().await;
    for n in 1..=5 {
        h.enqueue(n).await;
    }
    let options = DequeueOptions::new().count(3);

    let peeked = h.queue.peek(&options).await.unwrap();
    assert_eq!(numbers(&peeked), vec![1, 2, 3]);
    for message in &peeked {
        let stored = h.stored(message).await;
        assert_eq!(stored.delivery_count, 0);
        assert_eq!(stored.locked_until, unlocked());
    }

    let leased = h.queue.dequeue_batch(&options).await.unwrap();
    let peeked_ids: Vec<_> = peeked.iter().map(|m| m.id.clone()).collect();
    let leased_ids: Vec<_> = leased.iter().map(|m| m.id.clone()).collect();
    assert_eq!(leased_ids, peeked_ids);
}

#[tokio::test]
async fn batch_returns_locally_leased_copies() {
    let h = Harness::standard().await;
    for n in 1..=3 {
        h.enqueue(n).await;
    }

    let leased = h
        .queue
        .dequeue_batch(&DequeueOptions::new().count(10))
        .await
        .unwrap();

    assert_eq!(numbers(&leased), vec![1, 2, 3]);
    for message in &leased {
        assert_eq!(message.delivery_count, 1);
        assert_eq!(message.locked_until, h.queue.now() + secs(30));
        assert_eq!(&h.stored(message).await, message);
    }
    assert!(
        h.queue
            .dequeue_batch(&DequeueOptions::new().count(10))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn batch_auto_complete_marks_all_completed() {
    let h = Harness::standard().await;
    for n in 1..=2 {
        h.enqueue(n).await;
    }

    let options = DequeueOptions::new().count(2).auto_complete(true);
    let leased = h.queue.dequeue_batch(&options).await.unwrap();

    assert_eq!(leased.len(), 2);
    for message in &leased {
        assert!(message.is_completed());
        assert!(h.stored(message).await.is_completed());
    }
}

#[tokio::test]
async fn partitions_are_separate_lanes() {
    let h = Harness::standard().await;
    let a = h.message(1).with_partition_key("a");
    let b = h.message(2).with_partition_key("b");
    let none = h.message(3);
    for message in [a.clone(), b.clone(), none.clone()] {
        h.queue.enqueue(message).await.unwrap();
    }

    let lane_a = DequeueOptions::new().partition_key("a").count(10);
    let leased = h.queue.dequeue_batch(&lane_a).await.unwrap();
    assert_eq!(numbers(&leased), vec![1]);
    assert!(h.queue.dequeue(&lane_a).await.unwrap().is_none());

    let from_b = h
        .queue
        .dequeue(&DequeueOptions::new().partition_key("b"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_b.id, b.id);

    let unpartitioned = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    assert_eq!(unpartitioned.id, none.id);
}

#[tokio::test]
async fn held_partition_blocks_only_its_own_batches() {
    let h = Harness::standard().await;
    h.queue.enqueue(h.message(1).with_partition_key("a")).await.unwrap();
    h.queue.enqueue(h.message(2).with_partition_key("b")).await.unwrap();

    let held = h.queue.partition_locks().acquire(Some("a")).await;

    let lane_b = DequeueOptions::new().partition_key("b");
    let from_b = tokio::time::timeout(Duration::from_millis(200), h.queue.dequeue_batch(&lane_b))
        .await
        .expect("lane b must not wait for lane a")
        .unwrap();
    assert_eq!(numbers(&from_b), vec![2]);

    // peek takes no lock
    let lane_a = DequeueOptions::new().partition_key("a");
    let single = tokio::time::timeout(Duration::from_millis(200), h.queue.peek(&lane_a)).await;
    assert_eq!(single.unwrap().unwrap().len(), 1);

    let waiting = {
        let queue = h.queue.clone();
        tokio::spawn(async move { queue.dequeue_batch(&lane_a).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    drop(held);
    let from_a = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(numbers(&from_a), vec![1]);
}

#[tokio::test]
async fn shared_lock_registry_spans_queue_instances() {
    let locks = Arc::new(PartitionLocks::new());
    let store = Arc::new(InMemoryDocumentStore::new());
    let first: Queue<Job, _> = QueueBuilder::new(store.clone())
        .partition_locks(locks.clone())
        .open()
        .await
        .unwrap();
    let second: Queue<Job, _> = QueueBuilder::new(store)
        .partition_locks(locks)
        .open()
        .await
        .unwrap();

    let _held = first.partition_locks().acquire(None).await;
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        second.dequeue_batch(&DequeueOptions::new()),
    )
    .await;
    assert!(blocked.is_err());
}

#[tokio::test]
async fn store_errors_propagate_unchanged() {
    let h = Harness::standard().await;
    h.enqueue(1).await;

    h.store.fail_next("write concern timeout").await;
    let err = h.queue.dequeue(&DequeueOptions::new()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(
        matches!(err, QueueError::Store(StoreError::Unavailable(ref reason)) if reason == "write concern timeout")
    );

    // nothing was leased by the failed call
    assert!(h.queue.dequeue(&DequeueOptions::new()).await.unwrap().is_some());

    h.store.fail_next("network").await;
    let err = h.queue.enqueue(h.message(2)).await.unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn undecodable_document_is_still_leased() {
    let h = Harness::standard().await;
    let broken = Message::new_at(json!({"unexpected": true}), start()).with_id("broken");
    h.store.insert_one(broken).await.unwrap();

    let err = h.queue.dequeue(&DequeueOptions::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::Codec(_)));

    let raw = h.store.get(&MessageId::from("broken")).await.unwrap();
    assert_eq!(raw.delivery_count, 1);
}

#[tokio::test]
async fn cancelled_calls_do_not_touch_the_store() {
    let h = Harness::standard().await;
    let enqueued = h.enqueue(1).await;

    let handle = CancelHandle::new();
    handle.cancel();
    let options = DequeueOptions::new().cancel(handle.token());

    assert!(matches!(
        h.queue.dequeue(&options).await,
        Err(QueueError::Cancelled)
    ));
    assert!(matches!(
        h.queue.dequeue_batch(&options).await,
        Err(QueueError::Cancelled)
    ));
    assert!(matches!(
        h.queue.peek(&options).await,
        Err(QueueError::Cancelled)
    ));
    assert_eq!(h.stored(&enqueued).await.delivery_count, 0);
}

#[tokio::test]
async fn cancel_interrupts_wait_for_partition_lock() {
    let h = Harness::standard().await;
    h.enqueue(1).await;
    let _held = h.queue.partition_locks().acquire(None).await;

    let handle = CancelHandle::new();
    let waiting = {
        let queue = h.queue.clone();
        let options = DequeueOptions::new().cancel(handle.token());
        tokio::spawn(async move { queue.dequeue_batch(&options).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(QueueError::Cancelled)));
}

#[tokio::test]
async fn stream_holds_partition_lock_until_cancelled() {
    let h = Harness::standard().await;
    for n in 1..=3 {
        h.enqueue(n).await;
    }

    let handle = CancelHandle::new();
    let options = DequeueOptions::new()
        .count(2)
        .poll_interval(Duration::from_millis(10))
        .cancel(handle.token());
    let mut stream = h.queue.dequeue_stream(options);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.delivery_count, 1);
        seen.push(message.body.n);
    }
    assert_eq!(seen, vec![1, 2, 3]);

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        h.queue.dequeue_batch(&DequeueOptions::new()),
    )
    .await;
    assert!(blocked.is_err());

    handle.cancel();
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());

    let after = tokio::time::timeout(
        Duration::from_millis(200),
        h.queue.dequeue_batch(&DequeueOptions::new()),
    )
    .await
    .expect("lock released after cancel")
    .unwrap();
    assert!(after.is_empty());
}

#[tokio::test]
async fn dropping_stream_releases_lock() {
    let h = Harness::standard().await;
    h.enqueue(1).await;

    let mut stream = h.queue.dequeue_stream(DequeueOptions::new());
    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    let acquired =
        tokio::time::timeout(Duration::from_millis(200), h.queue.partition_locks().acquire(None))
            .await;
    assert!(acquired.is_ok());
}

#[tokio::test]
async fn stream_waits_for_new_messages() {
    let h = Harness::standard().await;
    let mut stream = h
        .queue
        .dequeue_stream(DequeueOptions::new().poll_interval(Duration::from_millis(10)));

    let producer = {
        let queue = h.queue.clone();
        let message = h.message(9);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            queue.enqueue(message).await
        })
    };

    let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message.body.n, 9);
    assert!(producer.await.unwrap().unwrap());
}

#[tokio::test]
async fn stream_ends_after_store_error() {
    let h = Harness::standard().await;
    h.enqueue(1).await;
    h.store.fail_next("primary stepped down").await;

    let mut stream = h.queue.dequeue_stream(DequeueOptions::new());
    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(QueueError::Store(StoreError::Unavailable(_)))));
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());

    let acquired =
        tokio::time::timeout(Duration::from_millis(200), h.queue.partition_locks().acquire(None))
            .await;
    assert!(acquired.is_ok());
}

#[tokio::test]
async fn completed_field_expiry_removes_after_window() {
    let h = Harness::open(
        QueueOptions::new(5, Duration::from_secs(30)).expire_after(Duration::from_secs(60)),
    )
    .await;
    let enqueued = h.enqueue(1).await;
    let leased = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    h.queue.complete(&leased).await.unwrap();

    let raw = h.store.get(&enqueued.id).await.unwrap();
    assert_eq!(raw.ttl, None);

    h.clock.advance(Duration::from_secs(59));
    assert_eq!(h.store.purge_expired().await, 0);
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.store.purge_expired().await, 1);
    assert!(h.queue.get(&enqueued.id).await.unwrap().is_none());
}

#[tokio::test]
async fn store_timestamp_expiry_arms_and_disarms_ttl() {
    let h = Harness::open(
        QueueOptions::new(5, Duration::from_secs(30))
            .expire_after(Duration::from_secs(60))
            .cosmos_db_compatibility(true),
    )
    .await;

    let expiry_index = h
        .store
        .indexes()
        .await
        .into_iter()
        .find(|index| index.name == expiry::EXPIRY_INDEX_NAME)
        .unwrap();
    assert_eq!(expiry_index.keys, vec![Field::StoreTimestamp]);
    assert_eq!(expiry_index.expire_after_seconds, Some(expiry::TTL_FOREVER));

    let enqueued = h.enqueue(1).await;
    let leased = h
        .queue
        .dequeue(&DequeueOptions::new().auto_complete(true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leased.ttl, Some(60));

    h.queue.fail(&leased).await.unwrap();
    assert_eq!(h.store.get(&enqueued.id).await.unwrap().ttl, Some(expiry::TTL_FOREVER));

    h.clock.advance(Duration::from_secs(120));
    assert_eq!(h.store.purge_expired().await, 0);

    let leased = h.queue.dequeue(&DequeueOptions::new()).await.unwrap().unwrap();
    h.queue.complete(&leased).await.unwrap();
    assert_eq!(h.store.get(&enqueued.id).await.unwrap().ttl, Some(60));

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.store.purge_expired().await, 1);
}

#[tokio::test]
async fn find_poisoned_skips_leased_and_completed() {
    let h = Harness::open(QueueOptions::new(2, Duration::from_secs(30))).await;
    let now = h.queue.now();

    let mut poisoned = h.message(1);
    poisoned.delivery_count = 2;
    let mut still_leased = h.message(2);
    still_leased.delivery_count = 2;
    still_leased.locked_until = now + secs(30);
    let mut finished = h.message(3);
    finished.delivery_count = 2;
    finished.completed = Some(now);
    for message in [poisoned.clone(), still_leased, finished, h.message(4)] {
        h.queue.enqueue(message).await.unwrap();
    }

    let found = h.queue.find_poisoned(10).await.unwrap();
    assert_eq!(numbers(&found), vec![1]);
    assert!(h.queue.find_poisoned(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn counts_cover_every_state() {
    let h = Harness::open(QueueOptions::new(2, Duration::from_secs(30))).await;
    let now = h.queue.now();

    let pending = h.message(1);
    let scheduled = h.message(2).scheduled_at(now + secs(3600));
    let mut leased = h.message(3);
    leased.delivery_count = 1;
    leased.locked_until = now + secs(30);
    let mut completed = h.message(4);
    completed.completed = Some(now);
    let mut poisoned = h.message(5);
    poisoned.delivery_count = 2;
    for message in [pending, scheduled, leased, completed, poisoned] {
        h.queue.enqueue(message).await.unwrap();
    }

    let counts = h.queue.counts().await.unwrap();
    assert_eq!(
        counts,
        QueueCounts {
            pending: 1,
            scheduled: 1,
            leased: 1,
            completed: 1,
            poisoned: 1,
        }
    );
    assert_eq!(counts.total(), 5);
}

#[tokio::test]
async fn open_rejects_zero_max_delivery_count() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let result = QueueBuilder::new(store.clone())
        .max_delivery_count(0)
        .open::<Job>()
        .await;

    assert!(matches!(result, Err(QueueError::InvalidOptions(_))));
    assert!(store.indexes().await.is_empty());
}

#[tokio::test]
async fn open_rejects_unrepresentable_lock_duration() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let result = QueueBuilder::new(store)
        .lock_duration(Duration::MAX)
        .open::<Job>()
        .await;

    assert!(matches!(result, Err(QueueError::InvalidOptions(_))));
}

#[tokio::test]
async fn lease_past_last_timestamp_fails_without_leasing() {
    let ages = Duration::from_secs(400_000 * 365 * 86_400);
    let h = Harness::open(QueueOptions::new(5, ages)).await;
    let enqueued = h.enqueue(1).await;

    let single = h.queue.dequeue(&DequeueOptions::new()).await;
    assert!(matches!(single, Err(QueueError::InvalidOptions(_))));
    let batch = h.queue.dequeue_batch(&DequeueOptions::new()).await;
    assert!(matches!(batch, Err(QueueError::InvalidOptions(_))));

    let stored = h.stored(&enqueued).await;
    assert_eq!(stored.delivery_count, 0);
    assert_eq!(stored.locked_until, unlocked());
}

#[tokio::test]
async fn reopening_does_not_duplicate_indexes() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let options = QueueOptions::default().expire_after(Duration::from_secs(60));

    let _first = Queue::<Job, _>::open(store.clone(), options.clone()).await.unwrap();
    let _second = Queue::<Job, _>::open(store.clone(), options).await.unwrap();

    let names: Vec<_> = store.indexes().await.into_iter().map(|i| i.name).collect();
    assert_eq!(
        names,
        vec![
            expiry::EXPIRY_INDEX_NAME.to_string(),
            indexes::DEQUEUE_INDEX_NAME.to_string()
        ]
    );
}

#[tokio::test]
async fn get_unknown_id_is_none() {
    let h = Harness::standard().await;
    assert!(h.queue.get(&MessageId::from("missing")).await.unwrap().is_none());
}
