//! Queue configuration: construction-time `QueueOptions`, per-call `DequeueOptions`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cancel::Cancellation;
use crate::error::QueueError;

pub const ENV_MAX_DELIVERY_COUNT: &str = "DOCQ_MAX_DELIVERY_COUNT";
pub const ENV_LOCK_DURATION_MS: &str = "DOCQ_LOCK_DURATION_MS";
pub const ENV_EXPIRE_AFTER_SECS: &str = "DOCQ_EXPIRE_AFTER_SECS";
pub const ENV_COSMOS_COMPAT: &str = "DOCQ_COSMOS_COMPAT";

/// Fixed for the lifetime of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Deliveries after which a message is poisoned.
    pub max_delivery_count: u32,

    /// Visibility timeout of a lease. Zero means dequeue hides nothing.
    #[serde(rename = "lock_duration_ms", with = "millis")]
    pub lock_duration: Duration,

    /// Remove completed messages this long after completion. `None` keeps them.
    #[serde(rename = "expire_after_secs", default, with = "optional_secs")]
    pub expire_after: Option<Duration>,

    /// Drive expiry through the store-managed `_ts` and a per-document `ttl`
    /// (CosmosDB) instead of an index on `Completed`.
    #[serde(default)]
    pub cosmos_db_compatibility: bool,
}

impl QueueOptions {
    pub fn new(max_delivery_count: u32, lock_duration: Duration) -> Self {
        Self {
            max_delivery_count,
            lock_duration,
            expire_after: None,
            cosmos_db_compatibility: false,
        }
    }

    pub fn expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = Some(expire_after);
        self
    }

    pub fn cosmos_db_compatibility(mut self, enabled: bool) -> Self {
        self.cosmos_db_compatibility = enabled;
        self
    }

    /// `expire_after` when it is set and non-zero.
    pub fn effective_expiry(&self) -> Option<Duration> {
        self.expire_after.filter(|after| !after.is_zero())
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_delivery_count == 0 {
            return Err(QueueError::InvalidOptions(
                "max_delivery_count must be at least 1".to_string(),
            ));
        }
        if chrono::Duration::from_std(self.lock_duration).is_err() {
            return Err(QueueError::InvalidOptions(format!(
                "lock_duration {:?} is out of range",
                self.lock_duration
            )));
        }
        if self
            .expire_after
            .is_some_and(|after| chrono::Duration::from_std(after).is_err())
        {
            return Err(QueueError::InvalidOptions(format!(
                "expire_after {:?} is out of range",
                self.expire_after
            )));
        }
        Ok(())
    }

    /// Read options from `DOCQ_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, QueueError> {
        let defaults = Self::default();
        let options = Self {
            max_delivery_count: env_var(ENV_MAX_DELIVERY_COUNT)?
                .unwrap_or(defaults.max_delivery_count),
            lock_duration: env_var(ENV_LOCK_DURATION_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_duration),
            expire_after: env_var(ENV_EXPIRE_AFTER_SECS)?.map(Duration::from_secs),
            cosmos_db_compatibility: env_var(ENV_COSMOS_COMPAT)?
                .unwrap_or(defaults.cosmos_db_compatibility),
        };
        options.validate()?;
        Ok(options)
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>, QueueError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QueueError::InvalidOptions(format!("{name}: cannot parse {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Per-call options for dequeue, peek and the continuous sequence.
#[derive(Debug, Clone)]
pub struct DequeueOptions {
    /// Batch size; one page of the continuous sequence.
    pub count: usize,

    /// Lane to read from. `None` is the unpartitioned lane.
    pub partition_key: Option<String>,

    /// Mark leased messages completed in the same update (optimistic completion).
    pub auto_complete: bool,

    pub cancel: Cancellation,

    /// Continuous sequence only: wait this long after an empty page.
    pub poll_interval: Duration,
}

impl DequeueOptions {
    pub fn new() -> Self {
        Self {
            count: 1,
            partition_key: None,
            auto_complete: false,
            cancel: Cancellation::never(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn auto_complete(mut self, enabled: bool) -> Self {
        self.auto_complete = enabled;
        self
    }

    pub fn cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        Ok(())
    }
}

impl Default for DequeueOptions {
    fn default() -> Self {
        Self::new()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
