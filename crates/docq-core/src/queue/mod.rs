//! Queue module: the engine, its options, expiry and index provisioning, and
//! the helpers a consumer needs around a lease (retry delays, cancellation).

pub mod cancel;
mod engine;
pub mod expiry;
pub mod indexes;
mod options;
mod partition;
mod retry;
mod stream;

#[cfg(test)]
mod tests;

pub use cancel::{CancelHandle, Cancellation};
pub use engine::{Queue, QueueBuilder};
pub use expiry::{CompletedFieldExpiry, ExpiryStrategy, StoreTimestampExpiry};
pub use options::{
    DequeueOptions, ENV_COSMOS_COMPAT, ENV_EXPIRE_AFTER_SECS, ENV_LOCK_DURATION_MS,
    ENV_MAX_DELIVERY_COUNT, QueueOptions,
};
pub use partition::{PartitionGuard, PartitionLocks};
pub use retry::RetryPolicy;
