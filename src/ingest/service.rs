use super::datalake::Datalake;
use super::replication::ReplicationCoordinator;
use super::types::{IngestResponse, IngestStatus};
use crate::grid::store::KeyValueStore;
use crate::index::claims::ClaimStore;
use crate::index::types::BookDocument;
use crate::mq::queue::MessageQueue;
use crate::mq::types::{EVENT_DOCUMENT_INGESTED, IngestEvent, QUEUE_INGESTED};
use crate::search::types::BookSummary;

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

const START_MARKER: &str = "*** START OF THE PROJECT GUTENBERG EBOOK";
const END_MARKER: &str = "*** END OF THE PROJECT GUTENBERG EBOOK";

/// The crawler side of the pipeline: claim, download, persist, replicate,
/// publish. Every failure path releases the claim so a retry stays possible.
pub struct IngestService {
    claims: Arc<ClaimStore>,
    datalake: Datalake,
    replication: ReplicationCoordinator,
    queue: Arc<MessageQueue>,
    catalog: Arc<dyn KeyValueStore<u32, BookSummary>>,
    node_id: String,
    replication_factor: usize,
    replica_peers: Vec<String>,
}

impl IngestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        claims: Arc<ClaimStore>,
        datalake: Datalake,
        replication: ReplicationCoordinator,
        queue: Arc<MessageQueue>,
        catalog: Arc<dyn KeyValueStore<u32, BookSummary>>,
        node_id: String,
        replication_factor: usize,
        replica_peers: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            claims,
            datalake,
            replication,
            queue,
            catalog,
            node_id,
            replication_factor,
            replica_peers,
        })
    }

    pub fn datalake(&self) -> &Datalake {
        &self.datalake
    }

    pub async fn ingest(&self, book_id: u32) -> IngestResponse {
        if !self.claims.try_claim(book_id).await {
            // Another actor owns this id right now. If a copy already exists
            // locally the request is satisfiable anyway.
            if let Some(existing) = self.datalake.find_file(book_id) {
                let mut resp = IngestResponse::bare(book_id, IngestStatus::Downloaded);
                resp.path = existing.parent().map(path_string);
                resp.file = existing
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string());
                resp.replication_factor = Some(self.replication_factor);
                resp.replicas = Some(vec![self.node_id.clone()]);
                resp.event_sent = Some(false);
                resp.queue = Some(QUEUE_INGESTED.to_string());
                resp.note = Some("already_claimed_using_existing_file".to_string());
                return resp;
            }
            return IngestResponse::bare(book_id, IngestStatus::AlreadyClaimed);
        }

        let text = match download_gutenberg(book_id).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to download book {}: {}", book_id, e);
                self.claims.release(book_id).await;
                return IngestResponse::failed(book_id, &format!("download failed: {}", e));
            }
        };

        self.ingest_downloaded(book_id, &text).await
    }

    /// Steps after a successful download; the claim for `book_id` must already
    /// be held by this caller.
    pub async fn ingest_downloaded(&self, book_id: u32, text: &str) -> IngestResponse {
        let (header, content, footer) = split_gutenberg_text(text);
        let document = BookDocument {
            id: book_id,
            header,
            content,
            footer,
        };

        let (saved_path, date, hour) = match self.datalake.save(&document) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!("Failed to store book {} in the datalake: {}", book_id, e);
                self.claims.release(book_id).await;
                return IngestResponse::failed(book_id, &format!("datalake store failed: {}", e));
            }
        };

        let summary = parse_book_summary(&document.header, book_id);
        if let Err(e) = self.catalog.put(book_id, summary).await {
            tracing::warn!("Failed to store catalog entry for {}: {}", book_id, e);
        }

        let document_json = match serde_json::to_string(&document) {
            Ok(json) => json,
            Err(e) => {
                self.claims.release(book_id).await;
                return IngestResponse::failed(book_id, &format!("serialization failed: {}", e));
            }
        };

        let replicas = match self
            .replication
            .replicate(
                book_id,
                &date,
                &hour,
                &document_json,
                self.replication_factor,
                &self.replica_peers,
            )
            .await
        {
            Ok(replicas) => replicas,
            Err(shortfall) => {
                tracing::error!(
                    "Replication for book {} fell short: {}/{} copies",
                    book_id,
                    shortfall.replicated_total,
                    shortfall.needed_total
                );
                self.claims.release(book_id).await;
                let mut resp =
                    IngestResponse::bare(book_id, IngestStatus::DownloadedButReplicationFailed);
                resp.replication_factor = Some(self.replication_factor);
                resp.replicated_total = Some(shortfall.replicated_total);
                resp.needed_total = Some(shortfall.needed_total);
                resp.replica_peers = Some(shortfall.attempted_peers);
                return resp;
            }
        };

        let event = IngestEvent {
            event_type: EVENT_DOCUMENT_INGESTED.to_string(),
            book_id,
            lake_path: self.datalake.lake_path_of(&saved_path),
            ingested_at: Utc::now().to_rfc3339(),
            replicas: replicas.clone(),
        };

        if let Err(e) = self.queue.publish(QUEUE_INGESTED, event).await {
            tracing::error!("Failed to publish ingested event for {}: {}", book_id, e);
            self.claims.release(book_id).await;
            let mut resp = IngestResponse::bare(
                book_id,
                IngestStatus::DownloadedAndReplicatedButEventFailed,
            );
            resp.path = saved_path.parent().map(path_string);
            resp.file = saved_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string());
            resp.replicas = Some(replicas);
            resp.error = Some(e.to_string());
            return resp;
        }

        // Claims are short-lived: the ingestion attempt is over, indexing
        // exclusion belongs to the per-book metadata lock.
        self.claims.release(book_id).await;

        let mut resp = IngestResponse::bare(book_id, IngestStatus::Downloaded);
        resp.path = saved_path.parent().map(path_string);
        resp.file = saved_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());
        resp.replication_factor = Some(self.replication_factor);
        resp.replicas = Some(replicas);
        resp.event_sent = Some(true);
        resp.queue = Some(QUEUE_INGESTED.to_string());
        resp
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub async fn download_gutenberg(book_id: u32) -> Result<String> {
    let url = format!(
        "https://www.gutenberg.org/cache/epub/{}/pg{}.txt",
        book_id, book_id
    );
    let response = reqwest::get(&url).await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Splits raw Gutenberg text on the START/END markers. Missing markers are
/// tolerated: the whole text becomes the content block.
pub fn split_gutenberg_text(text: &str) -> (String, String, String) {
    let Some(start_idx) = text.find(START_MARKER) else {
        return (String::new(), text.trim().to_string(), String::new());
    };
    let body_start = start_idx + START_MARKER.len();

    let header = text[..start_idx].trim().to_string();
    match text[body_start..].find(END_MARKER) {
        Some(end_offset) => {
            let end_idx = body_start + end_offset;
            let content = text[body_start..end_idx].trim().to_string();
            let footer = text[end_idx + END_MARKER.len()..].trim().to_string();
            (header, content, footer)
        }
        None => (header, text[body_start..].trim().to_string(), String::new()),
    }
}

pub fn parse_book_summary(header: &str, book_id: u32) -> BookSummary {
    let title =
        extract_header_field(header, "Title:").unwrap_or_else(|| format!("Book {}", book_id));
    let author = extract_header_field(header, "Author:").unwrap_or_else(|| "Unknown".to_string());
    let language =
        extract_header_field(header, "Language:").unwrap_or_else(|| "unknown".to_string());
    let year = extract_year(extract_header_field(header, "Release Date:").as_deref());

    BookSummary {
        book_id,
        title,
        author,
        language,
        year,
    }
}

fn extract_header_field(header: &str, label: &str) -> Option<String> {
    header
        .lines()
        .find_map(|line| {
            line.strip_prefix(label)
                .map(|value| value.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

fn extract_year(field: Option<&str>) -> Option<u32> {
    let text = field?;
    let re = Regex::new(r"(\d{4})").unwrap();
    re.captures(text)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}
