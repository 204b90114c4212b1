//! Message identifiers.
//!
//! A `MessageId` is the document key of a message and the only field the store
//! enforces uniqueness on. Three ways to get one:
//! - `MessageId::new()`: a fresh ULID (time-sortable, no coordination needed).
//! - `MessageId::derive_from(&body)`: SHA-256 of the JSON-encoded body, so two
//!   producers enqueueing the same payload collide and the second is dropped.
//! - `MessageId::from("...")`: any caller-chosen string (e.g. an upstream event id).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Deterministic id derived from the payload content.
    ///
    /// The same body always yields the same id, which turns a second enqueue of
    /// that body into a duplicate.
    pub fn derive_from<T: Serialize>(body: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(body)?;
        let digest = Sha256::digest(&bytes);
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Ok(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Ulid> for MessageId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        let c = MessageId::new();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn derived_ids_depend_only_on_content() {
        let a = MessageId::derive_from(&json!({"order": 42})).unwrap();
        let b = MessageId::derive_from(&json!({"order": 42})).unwrap();
        let c = MessageId::derive_from(&json!({"order": 43})).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        // 32 bytes of SHA-256 as lowercase hex
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = MessageId::from("order-42");
        let serialized = serde_json::to_string(&id).unwrap();
        assert_eq!(serialized, "\"order-42\"");

        let back: MessageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ulid_ids_keep_generation_order() {
        let id1 = MessageId::from(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = MessageId::from(Ulid::new());

        assert!(id1 < id2);
    }
}
