use serde::{Deserialize, Serialize};

/// Descriptive book metadata parsed from the Gutenberg header at ingestion
/// time, kept in the distributed catalog and used to hydrate search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookSummary {
    pub book_id: u32,
    pub title: String,
    pub author: String,
    pub language: String,
    pub year: Option<u32>,
}

/// One scored search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedBook {
    pub book_id: u32,
    pub title: String,
    pub author: String,
    pub year: Option<u32>,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_results: usize,
    pub returned_results: usize,
    pub search_time_ms: u64,
    pub documents: Vec<RankedBook>,
}
