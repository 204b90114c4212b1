//! Payload codec: typed message bodies <-> stored JSON documents.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::Message;
use crate::ports::Document;

/// Anything that can travel as a message body.
///
/// - `Serialize` / `DeserializeOwned`: the store keeps bodies as JSON values.
/// - `Send + Sync + 'static`: messages cross tasks and live inside streams.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

pub fn encode<T: Payload>(message: Message<T>) -> Result<Document, serde_json::Error> {
    message.try_map_body(|body| serde_json::to_value(body))
}

pub fn decode<T: Payload>(document: Document) -> Result<Message<T>, serde_json::Error> {
    document.try_map_body(serde_json::from_value)
}
