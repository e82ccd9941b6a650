//! Search Module Tests
//!
//! Validates text processing and the ranking pipeline.
//!
//! ## Test Scopes
//! - **Tokenizer**: splitting, normalization, length filter, stopword variant.
//! - **Ranking**: determinism, IDF math, the year tiebreak and the score floor.
//! - **Serialization**: JSON compatibility for API types.

#[cfg(test)]
mod tests {
    use crate::index::inverted::{InvertedIndex, LocalInvertedIndex, Posting};
    use crate::search::ranking::RankingEngine;
    use crate::search::tokenizer::{is_stop_word, letter_group, tokenize, tokenize_filtered};
    use crate::search::types::{BookSummary, RankedBook, SearchResponse};
    use anyhow::Result;
    use async_trait::async_trait;

    fn summary(book_id: u32, year: Option<u32>) -> BookSummary {
        BookSummary {
            book_id,
            title: format!("Book {}", book_id),
            author: "Author".to_string(),
            language: "en".to_string(),
            year,
        }
    }

    /// Index stand-in for an unreachable substrate.
    struct UnreachableIndex;

    #[async_trait]
    impl InvertedIndex for UnreachableIndex {
        async fn merge(&self, _term: &str, _posting: Posting) -> Result<()> {
            Err(anyhow::anyhow!("substrate unreachable"))
        }

        async fn postings(&self, _term: &str) -> Result<Vec<Posting>> {
            Err(anyhow::anyhow!("substrate unreachable"))
        }
    }

    // ============================================================
    // TOKENIZER
    // ============================================================

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("Hello World");
        assert_eq!(tokens, vec!["hello", "world"]);
    }

    #[test]
    fn test_tokenize_lowercases() {
        let tokens = tokenize("RUST Programming LANGUAGE");
        assert_eq!(tokens, vec!["rust", "programming", "language"]);
    }

    #[test]
    fn test_tokenize_drops_single_char_tokens() {
        // Tokens shorter than 2 characters are dropped; "am" (2 chars) stays
        let tokens = tokenize("I am a Rust programmer");
        assert_eq!(tokens, vec!["am", "rust", "programmer"]);
    }

    #[test]
    fn test_tokenize_preserves_order_and_duplicates() {
        let tokens = tokenize("cat dog cat cat");
        assert_eq!(tokens, vec!["cat", "dog", "cat", "cat"]);
    }

    #[test]
    fn test_tokenize_punctuation_is_separator() {
        let tokens = tokenize("Hello, World! How--are you?");
        assert_eq!(tokens, vec!["hello", "world", "how", "are", "you"]);
    }

    #[test]
    fn test_tokenize_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  .,;!  ").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_digits() {
        let tokens = tokenize("Rust 2024 edition");
        assert_eq!(tokens, vec!["rust", "2024", "edition"]);
    }

    #[test]
    fn test_tokenize_unicode_letters() {
        // Unicode letter runs survive as whole tokens
        let tokens = tokenize("Książka über алфавит");
        assert_eq!(tokens, vec!["książka", "über", "алфавит"]);
    }

    #[test]
    fn test_tokenize_filtered_drops_stopwords() {
        let tokens = tokenize_filtered("the cat sat on the mat");
        assert_eq!(tokens, vec!["cat", "sat", "mat"]);
    }

    #[test]
    fn test_raw_tokenizer_keeps_stopwords() {
        // The ranking path wants raw frequencies, including function words
        let tokens = tokenize("the cat sat");
        assert!(tokens.contains(&"the".to_string()));
        assert!(is_stop_word("the"));
    }

    #[test]
    fn test_letter_group() {
        assert_eq!(letter_group("apple"), "A");
        assert_eq!(letter_group("zebra"), "Z");
        assert_eq!(letter_group("über"), "Ü");
        assert_eq!(letter_group("2024"), "#");
        assert_eq!(letter_group(""), "#");
    }

    // ============================================================
    // RANKING
    // ============================================================

    #[tokio::test]
    async fn test_rank_is_deterministic() {
        let index = LocalInvertedIndex::new();
        index
            .merge("cat", Posting { book_id: 1, count: 3 })
            .await
            .unwrap();
        index
            .merge("cat", Posting { book_id: 2, count: 1 })
            .await
            .unwrap();

        let engine = RankingEngine::new(100_000);
        let candidates = vec![summary(1, Some(1900)), summary(2, Some(1850))];

        let first = engine.rank(candidates.clone(), "cat", &index).await;
        let second = engine.rank(candidates, "cat", &index).await;

        let ids_first: Vec<u32> = first.iter().map(|b| b.book_id).collect();
        let ids_second: Vec<u32> = second.iter().map(|b| b.book_id).collect();
        assert_eq!(ids_first, ids_second);
        assert_eq!(first[0].score, second[0].score);
    }

    #[tokio::test]
    async fn test_rank_year_breaks_score_ties() {
        let index = LocalInvertedIndex::new();
        index
            .merge("cat", Posting { book_id: 1, count: 1 })
            .await
            .unwrap();
        index
            .merge("cat", Posting { book_id: 2, count: 1 })
            .await
            .unwrap();

        let engine = RankingEngine::new(100_000);
        // Yearless book listed first, the 1865 one second
        let candidates = vec![summary(2, None), summary(1, Some(1865))];

        let ranked = engine.rank(candidates, "cat", &index).await;
        assert_eq!(ranked[0].book_id, 1, "book with a year ranks first");
        assert_eq!(ranked[1].book_id, 2);
    }

    #[tokio::test]
    async fn test_rank_newer_year_first() {
        let index = LocalInvertedIndex::new();
        index
            .merge("war", Posting { book_id: 1, count: 1 })
            .await
            .unwrap();

        let engine = RankingEngine::new(100_000);
        let candidates = vec![
            summary(1, Some(1812)),
            summary(2, Some(1954)),
            summary(3, Some(1869)),
        ];

        let ranked = engine.rank(candidates, "war", &index).await;
        let ids: Vec<u32> = ranked.iter().map(|b| b.book_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_rank_yearless_order_is_stable() {
        let index = LocalInvertedIndex::new();
        let engine = RankingEngine::new(100_000);
        let candidates = vec![summary(9, None), summary(4, None), summary(7, None)];

        let ranked = engine.rank(candidates, "anything", &index).await;
        let ids: Vec<u32> = ranked.iter().map(|b| b.book_id).collect();
        assert_eq!(ids, vec![9, 4, 7], "relative input order preserved");
    }

    #[tokio::test]
    async fn test_rank_score_clamped_to_floor() {
        let index = LocalInvertedIndex::new();
        index
            .merge("cat", Posting { book_id: 1, count: 1 })
            .await
            .unwrap();
        index
            .merge("cat", Posting { book_id: 2, count: 1 })
            .await
            .unwrap();

        // Corpus of 2, term in both books: idf = ln(2/2) = 0, clamped up
        let engine = RankingEngine::new(2);
        let ranked = engine
            .rank(vec![summary(1, None), summary(2, None)], "cat", &index)
            .await;

        assert_eq!(ranked[0].score, 0.001);
        assert_eq!(ranked[1].score, 0.001);
    }

    #[tokio::test]
    async fn test_rank_uses_fallback_when_index_unreachable() {
        let engine = RankingEngine::with_fallback(100_000, 1000);
        let ranked = engine
            .rank(vec![summary(1, None)], "cat", &UnreachableIndex)
            .await;

        // ln(100000 / 1000) = ln(100)
        let expected = 100f64.ln();
        assert!((ranked[0].score - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rank_empty_query_gets_floor_score() {
        let index = LocalInvertedIndex::new();
        let engine = RankingEngine::new(100_000);

        let ranked = engine.rank(vec![summary(1, None)], "", &index).await;
        assert_eq!(ranked[0].score, 0.001);
    }

    #[tokio::test]
    async fn test_rank_duplicate_query_terms_count_once() {
        let index = LocalInvertedIndex::new();
        index
            .merge("cat", Posting { book_id: 1, count: 1 })
            .await
            .unwrap();

        let engine = RankingEngine::new(100_000);
        let once = engine.rank(vec![summary(1, None)], "cat", &index).await;
        let thrice = engine
            .rank(vec![summary(1, None)], "cat cat cat", &index)
            .await;

        assert_eq!(once[0].score, thrice[0].score);
    }

    // ============================================================
    // SERIALIZATION
    // ============================================================

    #[test]
    fn test_book_summary_roundtrip() {
        let book = BookSummary {
            book_id: 1342,
            title: "Pride and Prejudice".to_string(),
            author: "Jane Austen".to_string(),
            language: "English".to_string(),
            year: Some(1813),
        };

        let json = serde_json::to_string(&book).unwrap();
        let restored: BookSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, book);
    }

    #[test]
    fn test_book_summary_optional_year() {
        let book = BookSummary {
            book_id: 7,
            title: "Unknown Manuscript".to_string(),
            author: "Anonymous".to_string(),
            language: "la".to_string(),
            year: None,
        };

        let json = serde_json::to_string(&book).unwrap();
        let restored: BookSummary = serde_json::from_str(&json).unwrap();
        assert!(restored.year.is_none());
    }

    #[test]
    fn test_search_response_serialization() {
        let response = SearchResponse {
            query: "whale".to_string(),
            total_results: 2,
            returned_results: 1,
            search_time_ms: 12,
            documents: vec![RankedBook {
                book_id: 2701,
                title: "Moby Dick".to_string(),
                author: "Herman Melville".to_string(),
                year: Some(1851),
                score: 4.6,
            }],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"total_results\":2"));
        assert!(json.contains("\"search_time_ms\":12"));

        let restored: SearchResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.documents.len(), 1);
        assert_eq!(restored.documents[0].book_id, 2701);
    }
}
