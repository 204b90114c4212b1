//! Ports - the engine's view of the outside world.
//!
//! - `DocumentStore`: the collection messages are persisted in.
//! - `Clock`: the source of "now" for leases, schedules and completion stamps.

pub mod clock;
pub mod document_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::document_store::{
    DeleteResult, Document, DocumentStore, Field, Filter, IndexSpec, StoreError, Update,
    UpdateResult,
};
