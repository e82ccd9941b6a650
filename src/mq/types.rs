use serde::{Deserialize, Serialize};

/// Point-to-point queues of the ingestion/indexing pipeline.
pub const QUEUE_INGESTED: &str = "books.ingested";
pub const QUEUE_REINDEX: &str = "books.reindex";
pub const QUEUE_INDEXED: &str = "books.indexed";

pub const EVENT_DOCUMENT_INGESTED: &str = "document_ingested";
pub const EVENT_DOCUMENT_INDEXED: &str = "document_indexed";

/// Unique message identifier; hashed for partition placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// The payload every pipeline queue carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    pub event_type: String,
    pub book_id: u32,
    pub lake_path: String,
    pub ingested_at: String,
    pub replicas: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageStatus {
    /// Deliverable: not yet claimed, or returned for redelivery.
    Pending,
    /// Claimed by a consumer holding an unexpired lease.
    InFlight,
}

/// A message as stored in the queue's partitions and replicated to backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntry {
    pub queue: String,
    pub event: IngestEvent,
    pub status: MessageStatus,
    /// Delivery attempts so far; grows on every claim.
    pub attempts: u32,
    pub enqueued_at: u64,
    /// While `InFlight`: the instant the lease lapses and the message becomes
    /// deliverable again (the consumer crashed or stalled).
    pub lease_expires: Option<u64>,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
