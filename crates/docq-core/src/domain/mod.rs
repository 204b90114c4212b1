//! Domain model: message entity, identifiers and derived state.

pub mod ids;
pub mod message;
pub mod state;

pub use self::ids::MessageId;
pub use self::message::{Message, unlocked};
pub use self::state::MessageState;
