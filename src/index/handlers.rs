use super::coordinator::IndexingCoordinator;
use super::inverted::{MergePostingRequest, Posting, PostingsResponse, ReplicatedInvertedIndex};
use super::merger::{GlobalIndexMerger, MergeSummary};
use super::metadata::DocumentMetadataStore;
use super::types::{DocumentMetadata, IndexReport, IndexRequest, IndexStatus, MetadataListResponse};

use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

/// `POST /index`: run the indexing state machine for one stored document.
pub async fn handle_index(
    Extension(coordinator): Extension<Arc<IndexingCoordinator>>,
    Json(req): Json<IndexRequest>,
) -> (StatusCode, Json<IndexReport>) {
    let report = coordinator.index(&req.lake_path).await;

    let code = match report.status {
        IndexStatus::Ok | IndexStatus::AlreadyIndexed => StatusCode::OK,
        IndexStatus::BadRequest => StatusCode::BAD_REQUEST,
        IndexStatus::NotFound => StatusCode::NOT_FOUND,
        IndexStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(report))
}

/// `POST /index/global`: batch-merge per-book artifacts into the canonical
/// hierarchical index.
pub async fn handle_global_merge(
    Extension(merger): Extension<Arc<GlobalIndexMerger>>,
) -> (StatusCode, Json<Option<MergeSummary>>) {
    match merger.run() {
        Ok(summary) => (StatusCode::OK, Json(Some(summary))),
        Err(e) => {
            tracing::error!("Global index merge failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(None))
        }
    }
}

/// `GET /metadata/{bookId}`
pub async fn handle_metadata_get(
    Extension(metadata): Extension<Arc<DocumentMetadataStore>>,
    Path(book_id): Path<u32>,
) -> (StatusCode, Json<Option<DocumentMetadata>>) {
    match metadata.get(book_id).await {
        Some(record) => (StatusCode::OK, Json(Some(record))),
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}

#[derive(Deserialize)]
pub struct MetadataListParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /metadata?offset=&limit=`
pub async fn handle_metadata_list(
    Extension(metadata): Extension<Arc<DocumentMetadataStore>>,
    Query(params): Query<MetadataListParams>,
) -> Json<MetadataListResponse> {
    let items = metadata.list(params.offset.unwrap_or(0), params.limit.unwrap_or(0));
    Json(MetadataListResponse {
        count: items.len(),
        items,
    })
}

// --- Internode endpoints of the replicated inverted index ---

pub async fn handle_index_merge(
    Extension(index): Extension<Arc<ReplicatedInvertedIndex>>,
    Json(req): Json<MergePostingRequest>,
) -> StatusCode {
    let posting = Posting {
        book_id: req.book_id,
        count: req.count,
    };
    match index
        .merge_as_primary(req.partition, req.op_id, &req.term, posting)
        .await
    {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Forwarded posting merge failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_index_replicate_merge(
    Extension(index): Extension<Arc<ReplicatedInvertedIndex>>,
    Json(req): Json<MergePostingRequest>,
) -> StatusCode {
    let posting = Posting {
        book_id: req.book_id,
        count: req.count,
    };
    index.apply_replica_merge(req.partition, req.op_id, &req.term, posting);
    StatusCode::OK
}

pub async fn handle_index_postings(
    Extension(index): Extension<Arc<ReplicatedInvertedIndex>>,
    Path(term): Path<String>,
) -> (StatusCode, Json<PostingsResponse>) {
    match index.postings_local_for(&term) {
        Some(postings) => (StatusCode::OK, Json(PostingsResponse { postings })),
        None => (
            StatusCode::NOT_FOUND,
            Json(PostingsResponse {
                postings: Vec::new(),
            }),
        ),
    }
}
