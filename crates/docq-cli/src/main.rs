use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};

use docq_core::queue::{CancelHandle, Cancellation};
use docq_core::{
    DequeueOptions, InMemoryDocumentStore, Message, MessageId, Queue, QueueError, QueueOptions,
    RetryPolicy, telemetry,
};

type HelloQueue = Queue<Hello, InMemoryDocumentStore>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Hello {
    name: String,
}

#[async_trait]
trait Handler: Send + Sync {
    async fn handle(&self, hello: &Hello) -> Result<(), String>;
}

/// Greets; "flaky" fails a few times first, "broken" never succeeds.
struct HelloHandler {
    flaky_failures: AtomicU32,
}

impl HelloHandler {
    fn new(flaky_failures: u32) -> Self {
        Self {
            flaky_failures: AtomicU32::new(flaky_failures),
        }
    }
}

#[async_trait]
impl Handler for HelloHandler {
    async fn handle(&self, hello: &Hello) -> Result<(), String> {
        match hello.name.as_str() {
            "broken" => Err("intentional permanent failure".to_string()),
            "flaky" => {
                let left = self.flaky_failures.load(Ordering::Relaxed);
                if left > 0 {
                    self.flaky_failures.fetch_sub(1, Ordering::Relaxed);
                    return Err(format!("intentional failure (left={left})"));
                }
                println!("Hello, {}!", hello.name);
                Ok(())
            }
            name => {
                println!("Hello, {name}!");
                Ok(())
            }
        }
    }
}

/// Report a failed message: reschedule it, or note that it is now poisoned.
async fn report_failure(
    queue: &HelloQueue,
    retry: &RetryPolicy,
    mut message: Message<Hello>,
    reason: &str,
) -> Result<(), QueueError> {
    if message.is_poisoned(queue.options().max_delivery_count) {
        warn!(id = %message.id, deliveries = message.delivery_count, %reason, "message poisoned");
    } else {
        warn!(id = %message.id, deliveries = message.delivery_count, %reason, "handler failed, retrying");
        message.schedule_retry(retry, queue.now());
    }
    queue.fail(&message).await?;
    Ok(())
}

/// Single-message polling workers on the unpartitioned lane.
struct WorkerGroup {
    shutdown: CancelHandle,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    fn spawn(
        n: usize,
        queue: HelloQueue,
        handler: Arc<dyn Handler>,
        retry: RetryPolicy,
    ) -> Self {
        let shutdown = CancelHandle::new();
        let joins = (0..n)
            .map(|worker| {
                let queue = queue.clone();
                let handler = Arc::clone(&handler);
                let retry = retry.clone();
                let cancel = shutdown.token();
                tokio::spawn(async move {
                    worker_loop(worker, queue, handler, retry, cancel).await;
                })
            })
            .collect();
        Self { shutdown, joins }
    }

    async fn shutdown_and_join(self) {
        self.shutdown.cancel();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker: usize,
    queue: HelloQueue,
    handler: Arc<dyn Handler>,
    retry: RetryPolicy,
    cancel: Cancellation,
) {
    let options = DequeueOptions::new().cancel(cancel.clone());
    loop {
        let message = match queue.dequeue(&options).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tokio::select! {
                    _ = sleep(Duration::from_millis(20)) => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }
            Err(QueueError::Cancelled) => break,
            Err(err) => {
                warn!(worker, error = %err, "dequeue failed");
                sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        info!(worker, id = %message.id, deliveries = message.delivery_count, "leased");
        let result = match handler.handle(&message.body).await {
            Ok(()) => queue.complete(&message).await.map(|_| ()),
            Err(reason) => report_failure(&queue, &retry, message, &reason).await,
        };
        if let Err(err) = result {
            warn!(worker, error = %err, "could not settle message");
        }
    }
    info!(worker, "worker stopped");
}

/// Stream consumer for one partition with optimistic completion: messages
/// arrive already completed and a failure reverts that through `fail`.
async fn partition_consumer(
    queue: HelloQueue,
    handler: Arc<dyn Handler>,
    retry: RetryPolicy,
    options: DequeueOptions,
) {
    let partition = options.partition_key.clone();
    let mut stream = queue.dequeue_stream(options);
    while let Some(next) = stream.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!(?partition, error = %err, "partition stream failed");
                break;
            }
        };
        if let Err(reason) = handler.handle(&message.body).await {
            if let Err(err) = report_failure(&queue, &retry, message, &reason).await {
                warn!(?partition, error = %err, "could not revert completion");
            }
        }
    }
    info!(?partition, "partition consumer stopped");
}

fn hello(name: &str) -> Message<Hello> {
    Message::new(Hello {
        name: name.to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    telemetry::init_tracing();

    // (A) queue over an in-memory store, options from DOCQ_* variables
    let options = QueueOptions::from_env()?;
    let store = Arc::new(InMemoryDocumentStore::new());
    let queue: HelloQueue = Queue::open(store, options).await?;
    let retry = RetryPolicy::new(Duration::from_millis(50), 2.0).with_jitter(0.2);
    let handler: Arc<dyn Handler> = Arc::new(HelloHandler::new(2));

    // (B) enqueue; the content-derived id turns the second "docq" into a duplicate
    let docq_id = MessageId::derive_from(&Hello {
        name: "docq".to_string(),
    })?;
    queue.enqueue(hello("docq").with_id(docq_id.clone())).await?;
    for name in ["flaky", "broken"] {
        queue.enqueue(hello(name)).await?;
    }
    if !queue.enqueue(hello("docq").with_id(docq_id.clone())).await? {
        warn!(id = %docq_id, "duplicate greeting ignored");
    }
    for name in ["lyon", "porto"] {
        queue.enqueue(hello(name).with_partition_key("eu")).await?;
    }

    // (C) two polling workers plus one stream consumer on the "eu" partition
    let workers = WorkerGroup::spawn(2, queue.clone(), Arc::clone(&handler), retry.clone());
    let stream_shutdown = CancelHandle::new();
    let consumer = tokio::spawn(partition_consumer(
        queue.clone(),
        Arc::clone(&handler),
        retry,
        DequeueOptions::new()
            .partition_key("eu")
            .count(10)
            .auto_complete(true)
            .poll_interval(Duration::from_millis(20))
            .cancel(stream_shutdown.token()),
    ));

    // (D) wait until nothing is left to deliver
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let counts = queue.counts().await?;
        if counts.pending + counts.scheduled + counts.leased == 0 || Instant::now() > deadline {
            println!("counts: {}", serde_json::to_string(&counts)?);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    for message in queue.find_poisoned(10).await? {
        println!(
            "poisoned: id={} name={} deliveries={}",
            message.id, message.body.name, message.delivery_count
        );
    }

    // (E) graceful shutdown
    workers.shutdown_and_join().await;
    stream_shutdown.cancel();
    let _ = consumer.await;
    Ok(())
}
