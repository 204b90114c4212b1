//! Impls - in-process implementations of the ports, for development and tests.
//!
//! Production stores (MongoDB, CosmosDB) implement `DocumentStore` in their own
//! crates.

pub mod memory;

pub use self::memory::InMemoryDocumentStore;
