//! docq-core
//!
//! A message queue on top of a document store.
//!
//! Messages are documents; a lease is a `LockedUntil` timestamp written by an
//! atomic update. A consumer that dies simply lets its lease lapse and the
//! message is delivered again. After `max_delivery_count` deliveries a message
//! is poisoned and left in place for inspection.
//!
//! # Modules
//! - **domain**: `Message`, `MessageId`, `MessageState`
//! - **ports**: `DocumentStore` and `Clock`, the engine's only dependencies
//! - **queue**: the engine (`Queue`, `QueueBuilder`), options, expiry, retry delays
//! - **impls**: `InMemoryDocumentStore`
//! - **codec**: typed bodies to stored JSON documents
//! - **observability**: per-state counts
//! - **telemetry**: tracing subscriber setup for binaries

pub mod codec;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod telemetry;

pub use codec::Payload;
pub use domain::{Message, MessageId, MessageState};
pub use error::QueueError;
pub use impls::InMemoryDocumentStore;
pub use observability::QueueCounts;
pub use ports::{Clock, DocumentStore, StoreError};
pub use queue::{
    CancelHandle, Cancellation, DequeueOptions, Queue, QueueBuilder, QueueOptions, RetryPolicy,
};
