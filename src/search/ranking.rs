use super::tokenizer::tokenize;
use super::types::{BookSummary, RankedBook};
use crate::index::inverted::InvertedIndex;
use std::cmp::Ordering;

/// Scores a candidate set against a query using inverse document frequency
/// computed from posting-list sizes.
///
/// The score is query-wide: every candidate in the set carries the same mean
/// IDF over the query terms (candidate membership already encodes term
/// presence). Ordering is therefore decided by the score first and the
/// publication year second.
pub struct RankingEngine {
    corpus_size: usize,
    fallback_document_frequency: usize,
    min_score: f64,
}

impl RankingEngine {
    pub fn new(corpus_size: usize) -> Self {
        Self {
            corpus_size,
            fallback_document_frequency: 1000,
            min_score: 0.001,
        }
    }

    /// `fallback_document_frequency` is used for a term whenever the index
    /// cannot be reached.
    pub fn with_fallback(corpus_size: usize, fallback_document_frequency: usize) -> Self {
        Self {
            corpus_size,
            fallback_document_frequency,
            min_score: 0.001,
        }
    }

    pub async fn rank(
        &self,
        candidates: Vec<BookSummary>,
        query: &str,
        index: &dyn InvertedIndex,
    ) -> Vec<RankedBook> {
        let mut terms: Vec<String> = Vec::new();
        for token in tokenize(query) {
            if !terms.contains(&token) {
                terms.push(token);
            }
        }

        let mut idf_sum = 0.0;
        for term in &terms {
            let document_frequency = match index.document_frequency(term).await {
                Ok(df) => df.max(1),
                Err(e) => {
                    tracing::warn!(
                        "Index unreachable for term '{}', using fallback document frequency: {}",
                        term,
                        e
                    );
                    self.fallback_document_frequency
                }
            };
            idf_sum += (self.corpus_size as f64 / document_frequency as f64).ln();
        }

        let mean_idf = if terms.is_empty() {
            0.0
        } else {
            idf_sum / terms.len() as f64
        };
        let score = mean_idf.max(self.min_score);

        let mut ranked: Vec<RankedBook> = candidates
            .into_iter()
            .map(|book| RankedBook {
                book_id: book.book_id,
                title: book.title,
                author: book.author,
                year: book.year,
                score,
            })
            .collect();

        // Stable sort: score descending, then year descending, books without a
        // year after those with one, original order preserved among equals.
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| match (a.year, b.year) {
                    (Some(ya), Some(yb)) => yb.cmp(&ya),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
        });

        ranked
    }
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self::new(100_000)
    }
}
