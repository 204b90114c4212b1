//! Continuous dequeue: an endless stream of leased messages for one partition.

use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use super::engine::Queue;
use super::options::DequeueOptions;
use super::partition::PartitionGuard;
use crate::codec::Payload;
use crate::domain::Message;
use crate::error::QueueError;
use crate::ports::DocumentStore;

struct StreamState<T, S> {
    queue: Queue<T, S>,
    options: DequeueOptions,
    guard: Option<PartitionGuard>,
    page: VecDeque<Message<T>>,
    finished: bool,
}

impl<T: Payload, S: DocumentStore + 'static> StreamState<T, S> {
    async fn next(mut self) -> Option<(Result<Message<T>, QueueError>, Self)> {
        loop {
            if self.finished || self.options.cancel.is_cancelled() {
                return self.finish();
            }

            if let Some(message) = self.page.pop_front() {
                return Some((Ok(message), self));
            }

            if self.guard.is_none() {
                let acquired = tokio::select! {
                    guard = self.queue.partitions.acquire(self.options.partition_key.as_deref()) => Some(guard),
                    _ = self.options.cancel.cancelled() => None,
                };
                match acquired {
                    Some(guard) => self.guard = Some(guard),
                    None => return self.finish(),
                }
            }

            match self.queue.lease_page(&self.options).await {
                Ok(page) if page.is_empty() => {
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(self.options.poll_interval) => false,
                        _ = self.options.cancel.cancelled() => true,
                    };
                    if cancelled {
                        return self.finish();
                    }
                }
                Ok(page) => self.page.extend(page),
                Err(QueueError::Cancelled) => return self.finish(),
                Err(err) => {
                    warn!(partition = ?self.options.partition_key, error = %err, "dequeue stream stopped");
                    self.finished = true;
                    self.guard = None;
                    return Some((Err(err), self));
                }
            }
        }
    }

    fn finish(mut self) -> Option<(Result<Message<T>, QueueError>, Self)> {
        if !self.page.is_empty() {
            // leases of undelivered messages lapse on their own
            debug!(undelivered = self.page.len(), "dequeue stream dropped leased page");
        }
        self.guard = None;
        None
    }
}

impl<T: Payload, S: DocumentStore + 'static> Queue<T, S> {
    /// Lease messages page by page until cancelled or dropped.
    ///
    /// Holds the partition lock from the first page until the stream ends, so
    /// `dequeue_batch` on the same partition and registry waits meanwhile.
    /// Sleeps `options.poll_interval` after an empty page. A store error is
    /// yielded once and ends the stream. Polling after the end keeps yielding
    /// `None`.
    pub fn dequeue_stream(
        &self,
        options: DequeueOptions,
    ) -> BoxStream<'static, Result<Message<T>, QueueError>> {
        let state = StreamState {
            queue: self.clone(),
            options,
            guard: None,
            page: VecDeque::new(),
            finished: false,
        };
        stream::unfold(state, StreamState::next).fuse().boxed()
    }
}
