//! Expiry of completed messages.
//!
//! Two stores, two mechanisms:
//! - `CompletedFieldExpiry`: a TTL index on `Completed`. Setting `Completed`
//!   starts the clock, clearing it stops the clock; nothing else to write.
//! - `StoreTimestampExpiry` (CosmosDB): the TTL index sits on the store-managed
//!   `_ts` with no collection default, and each document opts in through its
//!   `ttl` field. Completion writes `ttl = expire_after`, failure writes
//!   `ttl = -1` (live forever).

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use super::options::QueueOptions;
use crate::ports::{Field, IndexSpec, Update};

pub const EXPIRY_INDEX_NAME: &str = "docq_expiry";

/// `ttl` value meaning "never expire".
pub const TTL_FOREVER: i64 = -1;

pub trait ExpiryStrategy: Debug + Send + Sync {
    /// Field the expiry index is built on.
    fn expiry_index_field(&self) -> Field;

    /// Index to provision, or `None` when completed messages are kept.
    fn expiry_index(&self) -> Option<IndexSpec>;

    /// Extend a completion update so the store starts the expiry clock.
    fn arm_expiry(&self, update: &mut Update);

    /// Extend a failure update so a pending expiry is cancelled.
    fn disarm_expiry(&self, update: &mut Update);
}

fn whole_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFieldExpiry {
    expire_after: Option<Duration>,
}

impl CompletedFieldExpiry {
    pub fn new(expire_after: Option<Duration>) -> Self {
        Self { expire_after }
    }
}

impl ExpiryStrategy for CompletedFieldExpiry {
    fn expiry_index_field(&self) -> Field {
        Field::Completed
    }

    fn expiry_index(&self) -> Option<IndexSpec> {
        self.expire_after.map(|after| {
            IndexSpec::new(EXPIRY_INDEX_NAME, vec![Field::Completed])
                .expire_after_seconds(whole_seconds(after))
        })
    }

    // Completed itself is the pivot.
    fn arm_expiry(&self, _update: &mut Update) {}

    fn disarm_expiry(&self, _update: &mut Update) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTimestampExpiry {
    expire_after: Option<Duration>,
}

impl StoreTimestampExpiry {
    pub fn new(expire_after: Option<Duration>) -> Self {
        Self { expire_after }
    }
}

impl ExpiryStrategy for StoreTimestampExpiry {
    fn expiry_index_field(&self) -> Field {
        Field::StoreTimestamp
    }

    fn expiry_index(&self) -> Option<IndexSpec> {
        self.expire_after.map(|_| {
            IndexSpec::new(EXPIRY_INDEX_NAME, vec![Field::StoreTimestamp])
                .expire_after_seconds(TTL_FOREVER)
        })
    }

    fn arm_expiry(&self, update: &mut Update) {
        if let Some(after) = self.expire_after {
            update.set_ttl = Some(Some(whole_seconds(after)));
        }
    }

    fn disarm_expiry(&self, update: &mut Update) {
        if self.expire_after.is_some() {
            update.set_ttl = Some(Some(TTL_FOREVER));
        }
    }
}

/// The strategy selected by `options`.
pub fn strategy_for(options: &QueueOptions) -> Arc<dyn ExpiryStrategy> {
    let expire_after = options.effective_expiry();
    if options.cosmos_db_compatibility {
        Arc::new(StoreTimestampExpiry::new(expire_after))
    } else {
        Arc::new(CompletedFieldExpiry::new(expire_after))
    }
}
