//! Message entity: an application payload plus its delivery metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::state::MessageState;
use crate::queue::RetryPolicy;

/// The "unlocked" / "deliver immediately" timestamp.
///
/// `LockedUntil` and `ScheduledEnqueueTime` default to this value so the
/// eligibility comparisons against "now" need no null handling.
pub fn unlocked() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// A queued message.
///
/// Field names follow the stored document layout (`_id`, `Body`, `Created`,
/// ...), so a serialized `Message` is exactly what a document store persists.
///
/// Lifecycle:
/// - `DeliveryCount` grows by one per lease and is never reset.
/// - `LockedUntil` in the future hides the message (visibility timeout).
/// - `Completed` is set on success and cleared again only by Fail.
/// - Poisoning is not stored; it is `DeliveryCount >= max_delivery_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message<T> {
    #[serde(rename = "_id")]
    pub id: MessageId,

    pub body: T,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub delivery_count: u32,

    #[serde(default = "unlocked")]
    pub locked_until: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,

    #[serde(default = "unlocked")]
    pub scheduled_enqueue_time: DateTime<Utc>,

    /// Store-side time-to-live hint in seconds (`-1` = live forever).
    /// Only written when the queue runs with store-timestamp expiry.
    #[serde(rename = "ttl", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl<T> Message<T> {
    /// New message with a fresh id, created now, deliverable immediately.
    pub fn new(body: T) -> Self {
        Self::new_at(body, Utc::now())
    }

    /// New message with an explicit creation time.
    pub fn new_at(body: T, created: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            body,
            created,
            completed: None,
            delivery_count: 0,
            locked_until: unlocked(),
            partition_key: None,
            scheduled_enqueue_time: unlocked(),
            ttl: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Keep the message invisible until `at`.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_enqueue_time = at;
        self
    }

    /// Set `ScheduledEnqueueTime` for the next delivery according to `policy`.
    ///
    /// Intended to be called right before Fail, which persists the value.
    pub fn schedule_retry(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) {
        let delay = policy.next_delay(self.delivery_count);
        self.scheduled_enqueue_time = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn is_poisoned(&self, max_delivery_count: u32) -> bool {
        self.delivery_count >= max_delivery_count
    }

    /// Derived lifecycle state at `now`.
    pub fn state(&self, now: DateTime<Utc>, max_delivery_count: u32) -> MessageState {
        if self.completed.is_some() {
            MessageState::Completed
        } else if self.locked_until > now {
            MessageState::Leased
        } else if self.is_poisoned(max_delivery_count) {
            MessageState::Poisoned
        } else if self.scheduled_enqueue_time > now {
            MessageState::Scheduled
        } else {
            MessageState::Pending
        }
    }

    /// Same metadata, different body.
    pub fn map_body<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            id: self.id,
            body: f(self.body),
            created: self.created,
            completed: self.completed,
            delivery_count: self.delivery_count,
            locked_until: self.locked_until,
            partition_key: self.partition_key,
            scheduled_enqueue_time: self.scheduled_enqueue_time,
            ttl: self.ttl,
        }
    }

    pub fn try_map_body<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Message<U>, E> {
        let body = f(self.body)?;
        Ok(Message {
            id: self.id,
            body,
            created: self.created,
            completed: self.completed,
            delivery_count: self.delivery_count,
            locked_until: self.locked_until,
            partition_key: self.partition_key,
            scheduled_enqueue_time: self.scheduled_enqueue_time,
            ttl: self.ttl,
        })
    }
}
