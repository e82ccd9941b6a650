use serde::{Deserialize, Serialize};

/// Raw book artifact as persisted in the datalake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookDocument {
    pub id: u32,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub footer: String,
}

impl BookDocument {
    /// The text the content hash and the tokenizer run over.
    pub fn combined_text(&self) -> String {
        format!("{}\n{}\n{}", self.header, self.content, self.footer)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Ready,
    Indexed,
    Failed,
}

/// Per-book indexing state. Written only while holding that book's lock;
/// `content_hash` is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub book_id: u32,
    pub content_hash: String,
    pub indexed_at: String,
    pub token_count: usize,
    pub indexing_node_id: String,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Ok,
    AlreadyIndexed,
    BadRequest,
    NotFound,
    Error,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub lake_path: String,
}

/// Outcome of one indexing attempt, also the `/index` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub status: IndexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<u32>,
    pub lake_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_unique: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexReport {
    pub fn bad_request(lake_path: &str, msg: &str) -> Self {
        Self::bare(IndexStatus::BadRequest, lake_path, Some(msg))
    }

    pub fn not_found(lake_path: &str, msg: &str) -> Self {
        Self::bare(IndexStatus::NotFound, lake_path, Some(msg))
    }

    pub fn error(lake_path: &str, msg: &str) -> Self {
        Self::bare(IndexStatus::Error, lake_path, Some(msg))
    }

    fn bare(status: IndexStatus, lake_path: &str, error: Option<&str>) -> Self {
        Self {
            status,
            book_id: None,
            lake_path: lake_path.to_string(),
            resolved_path: None,
            file_size_bytes: None,
            index_file: None,
            tokens_total: None,
            terms_unique: None,
            error: error.map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetadataListResponse {
    pub count: usize,
    pub items: Vec<DocumentMetadata>,
}
