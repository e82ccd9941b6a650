use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Downloaded,
    AlreadyClaimed,
    Failed,
    DownloadedButReplicationFailed,
    DownloadedAndReplicatedButEventFailed,
}

/// Response of `POST /ingest/{bookId}`. Optional fields are populated per
/// status: quorum shortfalls carry the replication counters, successes the
/// stored location and replica set.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub book_id: u32,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicated_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needed_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_peers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn bare(book_id: u32, status: IngestStatus) -> Self {
        Self {
            book_id,
            status,
            path: None,
            file: None,
            replication_factor: None,
            replicas: None,
            replicated_total: None,
            needed_total: None,
            replica_peers: None,
            event_sent: None,
            queue: None,
            note: None,
            error: None,
        }
    }

    pub fn failed(book_id: u32, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::bare(book_id, IngestStatus::Failed)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestStatusResponse {
    pub book_id: u32,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct IngestListResponse {
    pub count: usize,
    pub books: Vec<u32>,
}
