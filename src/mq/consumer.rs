use super::queue::MessageQueue;
use super::types::{
    EVENT_DOCUMENT_INDEXED, IngestEvent, MessageEntry, MessageId, QUEUE_INDEXED, QUEUE_INGESTED,
    QUEUE_REINDEX,
};
use crate::index::coordinator::IndexingCoordinator;
use crate::index::types::IndexStatus;

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_secs(2);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(10);

/// Per-node consumer loop driving the indexing pipeline off the ingested and
/// reindex queues.
///
/// Dispatch is synchronous: one message is claimed, indexed, then settled. A
/// message is acknowledged only when the coordinator reports `ok` or
/// `already_indexed`; every other outcome returns it for redelivery. Shutdown
/// is cooperative: the flag is checked each iteration and in-flight
/// processing finishes first.
pub struct IngestConsumer {
    queue: Arc<MessageQueue>,
    coordinator: Arc<IndexingCoordinator>,
    shutdown: Arc<AtomicBool>,
}

impl IngestConsumer {
    pub fn new(
        queue: Arc<MessageQueue>,
        coordinator: Arc<IndexingCoordinator>,
        shutdown: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            coordinator,
            shutdown,
        })
    }

    /// Spawns `worker_count` independent consumer loops.
    pub async fn start(self: Arc<Self>, worker_count: usize) {
        tracing::info!("Starting {} ingest consumer workers", worker_count);

        for worker_id in 0..worker_count {
            let consumer = self.clone();
            tokio::spawn(async move {
                consumer.run(worker_id).await;
            });
        }
    }

    pub async fn run(&self, worker_id: usize) {
        tracing::info!("Consumer worker {} started", worker_id);

        while !self.shutdown.load(Ordering::SeqCst) {
            let mut claimed = false;

            'queues: for queue_name in [QUEUE_INGESTED, QUEUE_REINDEX] {
                for (message_id, entry) in self.queue.pending(queue_name) {
                    match self.queue.try_claim(&message_id) {
                        Ok(true) => {
                            self.process(&message_id, entry).await;
                            claimed = true;
                            // Refresh the pending view after each settle
                            break 'queues;
                        }
                        Ok(false) => continue,
                        Err(e) => {
                            tracing::warn!(
                                "Worker {} failed to claim message {}: {}",
                                worker_id,
                                message_id.0,
                                e
                            );
                            tokio::time::sleep(ERROR_BACKOFF).await;
                            continue;
                        }
                    }
                }
            }

            if !claimed {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        tracing::info!("Consumer worker {} stopped", worker_id);
    }

    /// Indexes one claimed message and settles it. Exposed for tests; returns
    /// true iff the message was acknowledged.
    pub async fn process(&self, message_id: &MessageId, entry: MessageEntry) -> bool {
        let renewal = self.spawn_lease_renewal(message_id);
        let report = self.coordinator.index(&entry.event.lake_path).await;
        renewal.abort();

        match report.status {
            IndexStatus::Ok | IndexStatus::AlreadyIndexed => {
                if let Err(e) = self.queue.ack(message_id) {
                    tracing::warn!("Failed to ack message {}: {}", message_id.0, e);
                }

                if report.status == IndexStatus::Ok {
                    self.publish_indexed(&entry.event).await;
                }

                tracing::info!(
                    "Indexed book {:?} from queue {} (status {:?})",
                    report.book_id,
                    entry.queue,
                    report.status
                );
                true
            }
            _ => {
                tracing::warn!(
                    "Indexing of {} failed (status {:?}, error {:?}), leaving message for redelivery",
                    entry.event.lake_path,
                    report.status,
                    report.error
                );
                if let Err(e) = self.queue.requeue(message_id) {
                    tracing::warn!("Failed to requeue message {}: {}", message_id.0, e);
                }
                false
            }
        }
    }

    fn spawn_lease_renewal(&self, message_id: &MessageId) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let message_id = message_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
                if queue.renew_lease(&message_id).is_err() {
                    break;
                }
            }
        })
    }

    async fn publish_indexed(&self, source: &IngestEvent) {
        let event = IngestEvent {
            event_type: EVENT_DOCUMENT_INDEXED.to_string(),
            book_id: source.book_id,
            lake_path: source.lake_path.clone(),
            ingested_at: Utc::now().to_rfc3339(),
            replicas: source.replicas.clone(),
        };

        // Best effort: the indexed state is re-derivable from metadata
        if let Err(e) = self.queue.publish(QUEUE_INDEXED, event).await {
            tracing::warn!(
                "Failed to publish indexed event for {}: {}",
                source.book_id,
                e
            );
        }
    }
}
