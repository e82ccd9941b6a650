use super::ranking::RankingEngine;
use super::tokenizer::tokenize;
use super::types::{BookSummary, SearchResponse};
use crate::grid::store::KeyValueStore;
use crate::index::inverted::InvertedIndex;

use axum::extract::Query;
use axum::{Extension, Json};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<usize>,
}

/// `GET /search?q=&limit=`
///
/// Candidates are the intersection of the posting lists of all query terms,
/// hydrated from the catalog and ranked by the IDF engine.
pub async fn handle_search(
    Query(params): Query<SearchParams>,
    Extension(index): Extension<Arc<dyn InvertedIndex>>,
    Extension(catalog): Extension<Arc<dyn KeyValueStore<u32, BookSummary>>>,
    Extension(ranking): Extension<Arc<RankingEngine>>,
) -> Json<SearchResponse> {
    let started = Instant::now();

    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(&params.q) {
        if !terms.contains(&token) {
            terms.push(token);
        }
    }

    let mut candidate_ids: Option<HashSet<u32>> = None;
    for term in &terms {
        let matches: HashSet<u32> = match index.postings(term).await {
            Ok(postings) => postings.iter().map(|posting| posting.book_id).collect(),
            Err(e) => {
                tracing::warn!("Posting lookup for '{}' failed: {}", term, e);
                HashSet::new()
            }
        };

        candidate_ids = Some(match candidate_ids {
            None => matches,
            Some(acc) => acc.intersection(&matches).copied().collect(),
        });
    }

    // Deterministic ranking input: the id set iterates in hash order
    let mut ids: Vec<u32> = candidate_ids.unwrap_or_default().into_iter().collect();
    ids.sort_unstable();

    let mut candidates: Vec<BookSummary> = Vec::with_capacity(ids.len());
    for book_id in ids {
        match catalog.get(&book_id).await {
            Ok(Some(summary)) => candidates.push(summary),
            Ok(None) => {
                tracing::debug!("Book {} matched but has no catalog entry", book_id);
            }
            Err(e) => {
                tracing::warn!("Catalog lookup for {} failed: {}", book_id, e);
            }
        }
    }

    let ranked = ranking.rank(candidates, &params.q, index.as_ref()).await;

    let limit = params.limit.unwrap_or(10);
    let total_results = ranked.len();
    let documents: Vec<_> = ranked.into_iter().take(limit).collect();

    Json(SearchResponse {
        query: params.q,
        total_results,
        returned_results: documents.len(),
        search_time_ms: started.elapsed().as_millis() as u64,
        documents,
    })
}
