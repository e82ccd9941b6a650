use super::artifact::{IndexArtifact, artifact_path, write_artifact};
use super::cache::HashCache;
use super::hasher::sha256_hex;
use super::inverted::{InvertedIndex, Posting};
use super::metadata::DocumentMetadataStore;
use super::types::{BookDocument, DocumentMetadata, DocumentStatus, IndexReport, IndexStatus};
use crate::search::tokenizer::tokenize;

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Orchestrates the indexing of one stored book: resolve, lock, hash-compare,
/// tokenize, merge into the shared index, persist the artifact, write metadata,
/// release.
///
/// All attempts for the same book id serialize on the per-book lock, including
/// duplicate queue deliveries racing from different consumers. The content hash
/// makes the serialized attempts idempotent: the second identical attempt is a
/// pure no-op reported as `already_indexed`.
pub struct IndexingCoordinator {
    lake_root: PathBuf,
    index_root: PathBuf,
    inverted: Arc<dyn InvertedIndex>,
    metadata: Arc<DocumentMetadataStore>,
    hash_cache: Arc<HashCache>,
    node_id: String,
}

impl IndexingCoordinator {
    pub fn new(
        lake_root: PathBuf,
        index_root: PathBuf,
        inverted: Arc<dyn InvertedIndex>,
        metadata: Arc<DocumentMetadataStore>,
        hash_cache: Arc<HashCache>,
        node_id: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            lake_root,
            index_root,
            inverted,
            metadata,
            hash_cache,
            node_id,
        })
    }

    fn resolve(&self, lake_path: &str) -> PathBuf {
        let path = Path::new(lake_path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.lake_root.join(path)
    }

    pub async fn index(&self, lake_path: &str) -> IndexReport {
        if lake_path.trim().is_empty() {
            return IndexReport::bad_request(lake_path, "lakePath missing");
        }

        let resolved = self.resolve(lake_path);
        if !resolved.is_file() {
            return IndexReport::not_found(lake_path, "file not found");
        }

        let raw = match std::fs::read_to_string(&resolved) {
            Ok(raw) => raw,
            Err(e) => {
                return IndexReport::error(lake_path, &format!("io error: {}", e));
            }
        };

        let book: BookDocument = match serde_json::from_str(&raw) {
            Ok(book) => book,
            Err(e) => {
                return IndexReport::bad_request(
                    lake_path,
                    &format!("malformed document payload: {}", e),
                );
            }
        };
        if book.id == 0 {
            return IndexReport::bad_request(lake_path, "book id must be positive");
        }

        let text = book.combined_text();
        if text.trim().is_empty() {
            return IndexReport::error(lake_path, "no indexable text found in document");
        }
        let hash = sha256_hex(&text);

        let lock = self.metadata.lock_for(book.id);
        let guard = lock.lock().await;
        let report = self
            .index_locked(book.id, &text, &hash, lake_path, &resolved)
            .await;
        guard.unlock().await;

        report
    }

    /// Steps 3-6 of the state machine, executed while holding the book's lock.
    async fn index_locked(
        &self,
        book_id: u32,
        text: &str,
        hash: &str,
        lake_path: &str,
        resolved: &Path,
    ) -> IndexReport {
        let out_path = artifact_path(&self.index_root, book_id);

        let cached_hash = self.hash_cache.get(book_id).await;
        let stored = self.metadata.get(book_id).await;

        let same_cached_hash = cached_hash.as_deref() == Some(hash);
        let same_metadata = stored
            .as_ref()
            .map(|md| md.content_hash == hash && md.status == DocumentStatus::Indexed)
            .unwrap_or(false);

        // Both signals are cluster-wide, so a duplicate delivery consumed on a
        // different node than the first one still short-circuits here instead
        // of double-counting postings.
        if same_cached_hash || same_metadata {
            // Unchanged content: no index mutation, no hash update. Only a
            // missing metadata record is backfilled.
            if stored.is_none() && same_cached_hash {
                let backfill = self.metadata_record(book_id, hash, 0, DocumentStatus::Indexed);
                if let Err(e) = self.metadata.put(book_id, backfill).await {
                    tracing::warn!("Metadata backfill for {} failed: {}", book_id, e);
                }
            }
            tracing::debug!("Book {} unchanged, skipping re-index", book_id);
            return self.report(IndexStatus::AlreadyIndexed, book_id, lake_path, resolved, &out_path, 0, 0);
        }

        // Changed or unknown hash: full tokenize-merge-persist run. For a
        // changed book this is the explicit re-index path and overwrites the
        // stored hash.
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return IndexReport::error(lake_path, "no tokens after tokenization");
        }

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        let tokens_total = tokens.len();
        let terms_unique = counts.len();

        for (term, count) in &counts {
            let posting = Posting {
                book_id,
                count: *count,
            };
            if let Err(e) = self.inverted.merge(term, posting).await {
                self.mark_failed(book_id, hash, tokens_total).await;
                return IndexReport::error(lake_path, &format!("index merge failed: {}", e));
            }
        }

        let artifact = IndexArtifact {
            book_id,
            lake_path: lake_path.to_string(),
            tokens_total,
            terms_unique,
            hash: hash.to_string(),
            terms: counts,
        };
        if let Err(e) = write_artifact(&out_path, &artifact) {
            self.mark_failed(book_id, hash, tokens_total).await;
            return IndexReport::error(lake_path, &format!("io error: {}", e));
        }

        self.hash_cache.put(book_id, hash.to_string()).await;

        let record = self.metadata_record(book_id, hash, tokens_total, DocumentStatus::Indexed);
        if let Err(e) = self.metadata.put(book_id, record).await {
            tracing::error!("Metadata write for {} failed: {}", book_id, e);
            return IndexReport::error(lake_path, &format!("metadata write failed: {}", e));
        }

        tracing::info!(
            "Indexed book {}: {} tokens, {} unique terms",
            book_id,
            tokens_total,
            terms_unique
        );
        self.report(IndexStatus::Ok, book_id, lake_path, resolved, &out_path, tokens_total, terms_unique)
    }

    fn metadata_record(
        &self,
        book_id: u32,
        hash: &str,
        token_count: usize,
        status: DocumentStatus,
    ) -> DocumentMetadata {
        DocumentMetadata {
            book_id,
            content_hash: hash.to_string(),
            indexed_at: Utc::now().to_rfc3339(),
            token_count,
            indexing_node_id: self.node_id.clone(),
            status,
        }
    }

    async fn mark_failed(&self, book_id: u32, hash: &str, token_count: usize) {
        let record = self.metadata_record(book_id, hash, token_count, DocumentStatus::Failed);
        if let Err(e) = self.metadata.put(book_id, record).await {
            tracing::error!("Failed to record FAILED metadata for {}: {}", book_id, e);
        }
    }

    fn report(
        &self,
        status: IndexStatus,
        book_id: u32,
        lake_path: &str,
        resolved: &Path,
        out_path: &Path,
        tokens_total: usize,
        terms_unique: usize,
    ) -> IndexReport {
        IndexReport {
            status,
            book_id: Some(book_id),
            lake_path: lake_path.to_string(),
            resolved_path: Some(normalize(resolved)),
            file_size_bytes: std::fs::metadata(resolved).map(|m| m.len()).ok(),
            index_file: Some(normalize(out_path)),
            tokens_total: Some(tokens_total),
            terms_unique: Some(terms_unique),
            error: None,
        }
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
