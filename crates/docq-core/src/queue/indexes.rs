//! Index provisioning, run once when a queue is opened.

use tracing::{debug, info};

use super::expiry::ExpiryStrategy;
use crate::ports::{DocumentStore, Field, IndexSpec, StoreError};

pub const DEQUEUE_INDEX_NAME: &str = "docq_dequeue";

/// Composite index matching the eligibility filter and the oldest-first sort.
pub fn dequeue_index() -> IndexSpec {
    IndexSpec::new(
        DEQUEUE_INDEX_NAME,
        vec![
            Field::DeliveryCount,
            Field::LockedUntil,
            Field::ScheduledEnqueueTime,
            Field::Completed,
            Field::Created,
            Field::PartitionKey,
        ],
    )
}

/// Create the expiry index (if any) and the dequeue index unless an index of
/// the same name exists. Returns the names created by this call.
pub async fn ensure_indexes<S>(
    store: &S,
    expiry: &dyn ExpiryStrategy,
) -> Result<Vec<String>, StoreError>
where
    S: DocumentStore + ?Sized,
{
    let existing = store.index_names().await?;
    let wanted = expiry.expiry_index().into_iter().chain([dequeue_index()]);

    let mut created = Vec::new();
    for index in wanted {
        if existing.contains(&index.name) {
            debug!(index = %index.name, "index already present");
            continue;
        }
        info!(
            index = %index.name,
            expire_after_seconds = ?index.expire_after_seconds,
            "creating index"
        );
        created.push(index.name.clone());
        store.create_index(index).await?;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryDocumentStore;
    use crate::queue::expiry::{CompletedFieldExpiry, EXPIRY_INDEX_NAME};
    use std::time::Duration;

    #[tokio::test]
    async fn creates_both_indexes_once() {
        let store = InMemoryDocumentStore::new();
        let expiry = CompletedFieldExpiry::new(Some(Duration::from_secs(60)));

        let first = ensure_indexes(&store, &expiry).await.unwrap();
        assert_eq!(
            first,
            vec![EXPIRY_INDEX_NAME.to_string(), DEQUEUE_INDEX_NAME.to_string()]
        );

        let second = ensure_indexes(&store, &expiry).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(store.indexes().await.len(), 2);
    }

    #[tokio::test]
    async fn skips_expiry_index_when_messages_are_kept() {
        let store = InMemoryDocumentStore::new();
        let expiry = CompletedFieldExpiry::new(None);

        let created = ensure_indexes(&store, &expiry).await.unwrap();

        assert_eq!(created, vec![DEQUEUE_INDEX_NAME.to_string()]);
        let index = &store.indexes().await[0];
        assert_eq!(index.keys.len(), 6);
        assert_eq!(index.keys[0], Field::DeliveryCount);
        assert_eq!(index.expire_after_seconds, None);
    }
}
