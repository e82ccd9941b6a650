//! Index Module Tests
//!
//! Exercises the coordination core against the in-process substrate: the
//! idempotency and re-index paths of the coordinator, mutual exclusion, claim
//! semantics, lock degradation, the artifact loader and the global merger.

#[cfg(test)]
mod tests {
    use crate::grid::lock::{ConsensusLock, LockToken};
    use crate::grid::store::{LocalKv, LocalSet, MemberSet};
    use crate::index::artifact::{IndexArtifact, IndexLoader, artifact_path, write_artifact};
    use crate::index::cache::HashCache;
    use crate::index::claims::ClaimStore;
    use crate::index::coordinator::IndexingCoordinator;
    use crate::index::hasher::sha256_hex;
    use crate::index::inverted::{InvertedIndex, LocalInvertedIndex, Posting};
    use crate::index::merger::GlobalIndexMerger;
    use crate::index::metadata::{DocumentMetadataStore, LockStrategy};
    use crate::index::types::{
        BookDocument, DocumentMetadata, DocumentStatus, IndexStatus,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TestEnv {
        lake: TempDir,
        index_dir: TempDir,
        inverted: Arc<LocalInvertedIndex>,
        metadata: Arc<DocumentMetadataStore>,
        hash_cache: Arc<HashCache>,
        coordinator: Arc<IndexingCoordinator>,
    }

    fn build_env(consensus: Option<Arc<dyn ConsensusLock>>) -> TestEnv {
        build_env_with_index(consensus, Arc::new(LocalInvertedIndex::new()))
    }

    fn build_env_with_index(
        consensus: Option<Arc<dyn ConsensusLock>>,
        inverted: Arc<LocalInvertedIndex>,
    ) -> TestEnv {
        let lake = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();

        let metadata = Arc::new(DocumentMetadataStore::new(
            Arc::new(LocalKv::new()),
            consensus,
        ));
        let hash_cache = Arc::new(HashCache::new(Arc::new(LocalKv::new())));

        let coordinator = IndexingCoordinator::new(
            lake.path().to_path_buf(),
            index_dir.path().to_path_buf(),
            inverted.clone(),
            metadata.clone(),
            hash_cache.clone(),
            "test-node".to_string(),
        );

        TestEnv {
            lake,
            index_dir,
            inverted,
            metadata,
            hash_cache,
            coordinator,
        }
    }

    fn write_book(env: &TestEnv, book_id: u32, content: &str) -> String {
        let document = BookDocument {
            id: book_id,
            header: String::new(),
            content: content.to_string(),
            footer: String::new(),
        };
        let lake_path = format!("{}.json", book_id);
        std::fs::write(
            env.lake.path().join(&lake_path),
            serde_json::to_string(&document).unwrap(),
        )
        .unwrap();
        lake_path
    }

    async fn posting_counts(index: &LocalInvertedIndex, term: &str) -> Vec<(u32, u32)> {
        let mut postings: Vec<(u32, u32)> = index
            .postings(term)
            .await
            .unwrap()
            .into_iter()
            .map(|p| (p.book_id, p.count))
            .collect();
        postings.sort_unstable();
        postings
    }

    // ============================================================
    // COORDINATOR: IDEMPOTENCY AND RE-INDEX
    // ============================================================

    #[tokio::test]
    async fn test_index_then_already_indexed() {
        let env = build_env(None);
        let lake_path = write_book(&env, 1346, "the cat sat on the mat");

        let first = env.coordinator.index(&lake_path).await;
        assert_eq!(first.status, IndexStatus::Ok);
        assert_eq!(first.book_id, Some(1346));
        assert_eq!(first.tokens_total, Some(6));

        let metadata_before = env.metadata.get(1346).await.unwrap();
        let cat_before = posting_counts(&env.inverted, "cat").await;

        let second = env.coordinator.index(&lake_path).await;
        assert_eq!(second.status, IndexStatus::AlreadyIndexed);

        // A true no-op: neither the index nor the metadata moved
        assert_eq!(posting_counts(&env.inverted, "cat").await, cat_before);
        assert_eq!(env.metadata.get(1346).await.unwrap(), metadata_before);
        assert_eq!(
            env.hash_cache.get(1346).await.as_deref(),
            Some(metadata_before.content_hash.as_str())
        );
    }

    #[tokio::test]
    async fn test_changed_content_triggers_reindex() {
        let env = build_env(None);
        let lake_path = write_book(&env, 11, "the cat sat");

        assert_eq!(env.coordinator.index(&lake_path).await.status, IndexStatus::Ok);
        let old_hash = env.metadata.get(11).await.unwrap().content_hash;

        // Upstream content changed: same book id, different text
        write_book(&env, 11, "the cat sat again");
        let report = env.coordinator.index(&lake_path).await;
        assert_eq!(report.status, IndexStatus::Ok);

        let updated = env.metadata.get(11).await.unwrap();
        assert_ne!(updated.content_hash, old_hash);
        assert_eq!(updated.status, DocumentStatus::Indexed);

        // Re-processing merges counts per (term, book) instead of duplicating
        let cat = posting_counts(&env.inverted, "cat").await;
        assert_eq!(cat, vec![(11, 2)]);
        assert_eq!(
            env.inverted.postings("cat").await.unwrap().len(),
            1,
            "one posting per (term, book) pair"
        );
    }

    #[tokio::test]
    async fn test_concurrent_indexing_of_same_book() {
        let env = build_env(None);
        let lake_path = write_book(&env, 7, "concurrent cats chase concurrent cats");

        let c1 = env.coordinator.clone();
        let c2 = env.coordinator.clone();
        let p1 = lake_path.clone();
        let p2 = lake_path.clone();

        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { c1.index(&p1).await }),
            tokio::spawn(async move { c2.index(&p2).await }),
        );
        let mut statuses = vec![r1.unwrap().status, r2.unwrap().status];
        statuses.sort_by_key(|s| format!("{:?}", s));

        assert_eq!(statuses, vec![IndexStatus::AlreadyIndexed, IndexStatus::Ok]);

        // No double counting: "concurrent" appears twice in the text, once here
        assert_eq!(
            posting_counts(&env.inverted, "concurrent").await,
            vec![(7, 2)]
        );
        assert_eq!(posting_counts(&env.inverted, "cats").await, vec![(7, 2)]);
    }

    // ============================================================
    // COORDINATOR: FAILURE MODES
    // ============================================================

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let env = build_env(None);
        let report = env.coordinator.index("9999.json").await;
        assert_eq!(report.status, IndexStatus::NotFound);
    }

    #[tokio::test]
    async fn test_blank_lake_path_is_bad_request() {
        let env = build_env(None);
        assert_eq!(env.coordinator.index("").await.status, IndexStatus::BadRequest);
        assert_eq!(
            env.coordinator.index("   ").await.status,
            IndexStatus::BadRequest
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let env = build_env(None);
        std::fs::write(env.lake.path().join("13.json"), "{not valid json").unwrap();

        let report = env.coordinator.index("13.json").await;
        assert_eq!(report.status, IndexStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_empty_document_is_error() {
        let env = build_env(None);
        let document = BookDocument {
            id: 21,
            header: String::new(),
            content: String::new(),
            footer: String::new(),
        };
        std::fs::write(
            env.lake.path().join("21.json"),
            serde_json::to_string(&document).unwrap(),
        )
        .unwrap();

        let report = env.coordinator.index("21.json").await;
        assert_eq!(report.status, IndexStatus::Error);
    }

    /// Index whose merge always fails; drives the coordinator error path.
    struct BrokenIndex;

    #[async_trait]
    impl InvertedIndex for BrokenIndex {
        async fn merge(&self, _term: &str, _posting: Posting) -> Result<()> {
            Err(anyhow::anyhow!("substrate write failed"))
        }

        async fn postings(&self, _term: &str) -> Result<Vec<Posting>> {
            Ok(Vec::new())
        }
    }

    /// Lock that counts acquisitions and releases.
    struct CountingLock {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl CountingLock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConsensusLock for CountingLock {
        fn quorum_available(&self) -> bool {
            true
        }

        async fn acquire(&self, _name: &str) -> Result<LockToken> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(LockToken("token".to_string()))
        }

        async fn release(&self, _name: &str, _token: &LockToken) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_merge_failure_releases_lock_and_marks_failed() {
        let lock = CountingLock::new();
        let lake = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();

        let metadata = Arc::new(DocumentMetadataStore::new(
            Arc::new(LocalKv::new()),
            Some(lock.clone() as Arc<dyn ConsensusLock>),
        ));
        let hash_cache = Arc::new(HashCache::new(Arc::new(LocalKv::new())));
        let coordinator = IndexingCoordinator::new(
            lake.path().to_path_buf(),
            index_dir.path().to_path_buf(),
            Arc::new(BrokenIndex),
            metadata.clone(),
            hash_cache,
            "test-node".to_string(),
        );

        let document = BookDocument {
            id: 5,
            header: String::new(),
            content: "some cat text".to_string(),
            footer: String::new(),
        };
        std::fs::write(
            lake.path().join("5.json"),
            serde_json::to_string(&document).unwrap(),
        )
        .unwrap();

        let report = coordinator.index("5.json").await;
        assert_eq!(report.status, IndexStatus::Error);

        // The failure path may not leak the held lock
        assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);

        let failed = metadata.get(5).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
    }

    // ============================================================
    // CONTENT HASH
    // ============================================================

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_differs_on_change() {
        assert_ne!(sha256_hex("the cat sat"), sha256_hex("the cat ran"));
        assert_eq!(sha256_hex("the cat sat"), sha256_hex("the cat sat"));
    }

    // ============================================================
    // METADATA STORE
    // ============================================================

    fn record(book_id: u32) -> DocumentMetadata {
        DocumentMetadata {
            book_id,
            content_hash: format!("hash-{}", book_id),
            indexed_at: "2026-01-12T23:00:00Z".to_string(),
            token_count: 10,
            indexing_node_id: "test-node".to_string(),
            status: DocumentStatus::Indexed,
        }
    }

    #[tokio::test]
    async fn test_metadata_list_clamps_offset_and_limit() {
        let store = DocumentMetadataStore::new(Arc::new(LocalKv::new()), None);
        for book_id in 1..=5 {
            store.put(book_id, record(book_id)).await.unwrap();
        }

        // Negative offset clamps to 0; non-positive limit defaults to 100
        assert_eq!(store.list(-5, 0).len(), 5);
        assert_eq!(store.list(0, -1).len(), 5);
        assert_eq!(store.list(0, 2).len(), 2);
        assert_eq!(store.list(3, 100).len(), 2);
        assert_eq!(store.list(10, 5).len(), 0);
    }

    #[tokio::test]
    async fn test_metadata_put_is_last_writer_wins() {
        let store = DocumentMetadataStore::new(Arc::new(LocalKv::new()), None);
        store.put(1, record(1)).await.unwrap();

        let mut updated = record(1);
        updated.content_hash = "new-hash".to_string();
        store.put(1, updated).await.unwrap();

        assert_eq!(store.get(1).await.unwrap().content_hash, "new-hash");
    }

    // ============================================================
    // LOCK STRATEGY AND DEGRADATION
    // ============================================================

    /// Lock whose quorum reports healthy but whose acquire always throws.
    struct FailingLock;

    #[async_trait]
    impl ConsensusLock for FailingLock {
        fn quorum_available(&self) -> bool {
            true
        }

        async fn acquire(&self, _name: &str) -> Result<LockToken> {
            Err(anyhow::anyhow!("cp subsystem gone"))
        }

        async fn release(&self, _name: &str, _token: &LockToken) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lock_degrades_to_local_once_consensus_throws() {
        let env = build_env(Some(Arc::new(FailingLock)));
        assert_eq!(env.metadata.lock_strategy(), LockStrategy::Consensus);
        assert!(!env.metadata.lock_degraded());

        // Indexing still succeeds via the local fallback
        let lake_path = write_book(&env, 3, "degraded but alive");
        assert_eq!(env.coordinator.index(&lake_path).await.status, IndexStatus::Ok);

        assert!(env.metadata.lock_degraded());
        assert_eq!(env.metadata.lock_strategy(), LockStrategy::Local);
    }

    #[tokio::test]
    async fn test_no_quorum_selects_local_strategy_up_front() {
        /// Lock with no quorum behind it.
        struct NoQuorumLock;

        #[async_trait]
        impl ConsensusLock for NoQuorumLock {
            fn quorum_available(&self) -> bool {
                false
            }

            async fn acquire(&self, _name: &str) -> Result<LockToken> {
                panic!("must not be called without a quorum");
            }

            async fn release(&self, _name: &str, _token: &LockToken) -> Result<()> {
                Ok(())
            }
        }

        let store = DocumentMetadataStore::new(Arc::new(LocalKv::new()), Some(Arc::new(NoQuorumLock)));
        assert_eq!(store.lock_strategy(), LockStrategy::Local);

        // Not a degradation: the selection was deliberate
        assert!(!store.lock_degraded());

        let guard = store.lock_for(12).lock().await;
        guard.unlock().await;
    }

    #[tokio::test]
    async fn test_healthy_consensus_lock_is_used_and_released() {
        let lock = CountingLock::new();
        let env = build_env(Some(lock.clone() as Arc<dyn ConsensusLock>));

        let lake_path = write_book(&env, 8, "locked cat text");
        assert_eq!(env.coordinator.index(&lake_path).await.status, IndexStatus::Ok);

        assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
        assert!(!env.metadata.lock_degraded());
    }

    // ============================================================
    // CLAIMS
    // ============================================================

    #[tokio::test]
    async fn test_claim_exclusivity_under_contention() {
        let claims = Arc::new(ClaimStore::new(Arc::new(LocalSet::new())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let claims = claims.clone();
            handles.push(tokio::spawn(async move { claims.try_claim(1342).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent claimer wins");

        claims.release(1342).await;
        assert!(claims.try_claim(1342).await, "released id is claimable again");
    }

    #[tokio::test]
    async fn test_release_of_absent_claim_is_noop() {
        let claims = ClaimStore::new(Arc::new(LocalSet::new()));
        claims.release(999).await;
        assert!(claims.try_claim(999).await);
    }

    /// Substrate set that always errors, as if the cluster were unreachable.
    struct UnreachableSet;

    #[async_trait]
    impl MemberSet<u32> for UnreachableSet {
        async fn add_if_absent(&self, _value: u32) -> Result<bool> {
            Err(anyhow::anyhow!("cluster unreachable"))
        }

        async fn remove(&self, _value: &u32) -> Result<()> {
            Err(anyhow::anyhow!("cluster unreachable"))
        }
    }

    #[tokio::test]
    async fn test_claims_fail_open_to_local_set() {
        let claims = ClaimStore::new(Arc::new(UnreachableSet));

        // Availability preserved: the claim succeeds locally
        assert!(claims.try_claim(100).await);
        // Exclusivity degrades to this node, and that is observable
        assert!(!claims.try_claim(100).await);
        assert!(claims.degraded());

        claims.release(100).await;
        assert!(claims.try_claim(100).await);
    }

    // ============================================================
    // HASH CACHE
    // ============================================================

    #[tokio::test]
    async fn test_hash_cache_invalidate_and_clear() {
        let cache = HashCache::new(Arc::new(LocalKv::new()));

        cache.put(1, "aaa".to_string()).await;
        cache.put(2, "bbb".to_string()).await;
        assert_eq!(cache.get(1).await.as_deref(), Some("aaa"));

        cache.invalidate(1).await;
        assert_eq!(cache.get(1).await, None);
        assert_eq!(cache.get(2).await.as_deref(), Some("bbb"));

        cache.clear().await;
        assert_eq!(cache.get(2).await, None);
    }

    // ============================================================
    // ARTIFACT LOADER
    // ============================================================

    fn artifact(book_id: u32, terms: &[(&str, u32)]) -> IndexArtifact {
        let mut map = BTreeMap::new();
        for (term, count) in terms {
            map.insert(term.to_string(), *count);
        }
        IndexArtifact {
            book_id,
            lake_path: format!("{}.json", book_id),
            tokens_total: map.values().map(|c| *c as usize).sum(),
            terms_unique: map.len(),
            hash: format!("hash-{}", book_id),
            terms: map,
        }
    }

    #[tokio::test]
    async fn test_loader_folds_artifacts_and_skips_corrupt_files() {
        let index_dir = tempfile::tempdir().unwrap();
        let inverted = Arc::new(LocalInvertedIndex::new());
        let hash_cache = Arc::new(HashCache::new(Arc::new(LocalKv::new())));

        write_artifact(
            &artifact_path(index_dir.path(), 1),
            &artifact(1, &[("cat", 3), ("sat", 1)]),
        )
        .unwrap();
        write_artifact(
            &artifact_path(index_dir.path(), 2),
            &artifact(2, &[("cat", 1)]),
        )
        .unwrap();
        // Corrupt artifact must be skipped with a warning, not abort the batch
        std::fs::write(index_dir.path().join("3.index.json"), "{broken").unwrap();
        // Already known to the cluster: same hash in the cache
        write_artifact(
            &artifact_path(index_dir.path(), 4),
            &artifact(4, &[("dog", 2)]),
        )
        .unwrap();
        hash_cache.put(4, "hash-4".to_string()).await;

        let loader = IndexLoader::new(
            index_dir.path().to_path_buf(),
            inverted.clone(),
            hash_cache.clone(),
        );
        let summary = loader.load_all().await;

        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);

        assert_eq!(
            posting_counts(&inverted, "cat").await,
            vec![(1, 3), (2, 1)]
        );
        assert!(inverted.postings("dog").await.unwrap().is_empty());
        assert_eq!(hash_cache.get(1).await.as_deref(), Some("hash-1"));
    }

    // ============================================================
    // GLOBAL INDEX MERGER
    // ============================================================

    #[test]
    fn test_merger_is_deterministic_and_sums_counts() {
        let index_dir = tempfile::tempdir().unwrap();
        let out = index_dir.path().join("inverted_index.json");

        write_artifact(
            &artifact_path(index_dir.path(), 10),
            &artifact(10, &[("cat", 2), ("zebra", 1)]),
        )
        .unwrap();
        write_artifact(
            &artifact_path(index_dir.path(), 11),
            &artifact(11, &[("cat", 5)]),
        )
        .unwrap();
        // A second file for book 10 (stale copy): counts must sum, not duplicate
        write_artifact(
            &index_dir.path().join("10_old.index.json"),
            &artifact(10, &[("cat", 1)]),
        )
        .unwrap();

        let merger = GlobalIndexMerger::new(index_dir.path().to_path_buf(), out.clone());
        let (first, merged, skipped) = merger.merge().unwrap();
        assert_eq!(merged, 3);
        assert_eq!(skipped, 0);

        let cat = &first["C"]["cat"];
        let counts: Vec<(u32, u32)> = cat.iter().map(|p| (p.book_id, p.count)).collect();
        assert_eq!(counts, vec![(10, 3), (11, 5)]);

        // Fresh accumulator, same inputs: byte-identical output
        let (second, _, _) = merger.merge().unwrap();
        assert_eq!(
            serde_json::to_string_pretty(&first).unwrap(),
            serde_json::to_string_pretty(&second).unwrap()
        );
    }

    #[test]
    fn test_merger_drops_stopwords_and_groups_by_letter() {
        let index_dir = tempfile::tempdir().unwrap();
        let out = index_dir.path().join("inverted_index.json");

        write_artifact(
            &artifact_path(index_dir.path(), 1),
            &artifact(1, &[("the", 9), ("cat", 2), ("2024", 1)]),
        )
        .unwrap();

        let merger = GlobalIndexMerger::new(index_dir.path().to_path_buf(), out);
        let (global, _, _) = merger.merge().unwrap();

        assert!(global.contains_key("C"));
        assert!(global["C"].contains_key("cat"));
        assert!(global.contains_key("#"), "digit terms group under '#'");
        // Stopwords never reach the hierarchical export
        assert!(!global.values().any(|group| group.contains_key("the")));
    }

    #[test]
    fn test_merger_skips_corrupt_artifacts() {
        let index_dir = tempfile::tempdir().unwrap();
        let out = index_dir.path().join("inverted_index.json");

        write_artifact(
            &artifact_path(index_dir.path(), 1),
            &artifact(1, &[("cat", 1)]),
        )
        .unwrap();
        std::fs::write(index_dir.path().join("2.index.json"), "not json at all").unwrap();

        let merger = GlobalIndexMerger::new(index_dir.path().to_path_buf(), out);
        let (global, merged, skipped) = merger.merge().unwrap();

        assert_eq!(merged, 1);
        assert_eq!(skipped, 1);
        assert!(global["C"].contains_key("cat"));
    }

    // ============================================================
    // END-TO-END EXAMPLE
    // ============================================================

    #[tokio::test]
    async fn test_two_book_end_to_end_example() {
        use crate::search::ranking::RankingEngine;
        use crate::search::types::BookSummary;

        let env = build_env(None);
        let path1 = write_book(&env, 1, "the cat sat");
        let path2 = write_book(&env, 2, "the cat ran");

        assert_eq!(env.coordinator.index(&path1).await.status, IndexStatus::Ok);
        assert_eq!(env.coordinator.index(&path2).await.status, IndexStatus::Ok);

        // Raw tokenizer keeps "the": both books carry it in the live index
        assert_eq!(
            posting_counts(&env.inverted, "the").await,
            vec![(1, 1), (2, 1)]
        );

        // Query "cat" matches both candidates with a tied score, stable order
        let candidates = vec![
            BookSummary {
                book_id: 1,
                title: "Cat One".to_string(),
                author: "A".to_string(),
                language: "en".to_string(),
                year: None,
            },
            BookSummary {
                book_id: 2,
                title: "Cat Two".to_string(),
                author: "B".to_string(),
                language: "en".to_string(),
                year: None,
            },
        ];
        let engine = RankingEngine::new(2);
        let ranked = engine.rank(candidates, "cat", env.inverted.as_ref()).await;

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].book_id, 1);
        assert_eq!(ranked[1].book_id, 2);

        // The stopword-aware hierarchical export drops "the" but keeps "cat"
        let out = env.index_dir.path().join("inverted_index.json");
        let merger = GlobalIndexMerger::new(env.index_dir.path().to_path_buf(), out);
        let (global, _, _) = merger.merge().unwrap();

        assert!(!global.values().any(|group| group.contains_key("the")));
        let cat: Vec<u32> = global["C"]["cat"].iter().map(|p| p.book_id).collect();
        assert_eq!(cat, vec![1, 2]);
    }
}
