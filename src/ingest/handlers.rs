use super::service::IngestService;
use super::types::{IngestListResponse, IngestResponse, IngestStatus, IngestStatusResponse};
use crate::index::types::BookDocument;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

/// `POST /ingest/{bookId}`
pub async fn handle_ingest(
    Extension(service): Extension<Arc<IngestService>>,
    Path(book_id): Path<u32>,
) -> (StatusCode, Json<IngestResponse>) {
    let response = service.ingest(book_id).await;

    let code = match response.status {
        IngestStatus::Downloaded => StatusCode::OK,
        IngestStatus::AlreadyClaimed => StatusCode::CONFLICT,
        IngestStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        IngestStatus::DownloadedButReplicationFailed
        | IngestStatus::DownloadedAndReplicatedButEventFailed => StatusCode::BAD_GATEWAY,
    };
    (code, Json(response))
}

/// `GET /ingest/status/{bookId}`
pub async fn handle_ingest_status(
    Extension(service): Extension<Arc<IngestService>>,
    Path(book_id): Path<u32>,
) -> Json<IngestStatusResponse> {
    let status = if service.datalake().find_file(book_id).is_some() {
        "available"
    } else {
        "missing"
    };

    Json(IngestStatusResponse {
        book_id,
        status: status.to_string(),
    })
}

/// `GET /ingest/list`
pub async fn handle_ingest_list(
    Extension(service): Extension<Arc<IngestService>>,
) -> Json<IngestListResponse> {
    let books = service.datalake().list_books();
    Json(IngestListResponse {
        count: books.len(),
        books,
    })
}

/// `POST /internal/replica/{date}/{hour}/{bookId}`: receives a document copy
/// from a peer running its replication quorum.
pub async fn handle_replica_receive(
    Extension(service): Extension<Arc<IngestService>>,
    Path((date, hour, book_id)): Path<(String, String, u32)>,
    body: String,
) -> StatusCode {
    // Reject garbage early; a corrupt replica is worse than a missing one
    if serde_json::from_str::<BookDocument>(&body).is_err() {
        tracing::warn!("Rejecting malformed replica payload for book {}", book_id);
        return StatusCode::BAD_REQUEST;
    }

    match service.datalake().save_raw(&date, &hour, book_id, &body) {
        Ok(path) => {
            tracing::info!(
                "Stored replica of book {} at {}",
                book_id,
                path.to_string_lossy()
            );
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("Failed to store replica of book {}: {}", book_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
