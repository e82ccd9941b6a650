//! Ingestion Module Tests
//!
//! Validates the replication quorum rules, the claim-release discipline of the
//! ingestion flow, and the Gutenberg text preprocessing.
//!
//! *Note: the actual Gutenberg download needs the network and is exercised in
//! integration deployments; these tests enter the flow after the download.*

#[cfg(test)]
mod tests {
    use crate::grid::partitioner::PartitionManager;
    use crate::grid::store::{KeyValueStore, LocalKv, LocalSet};
    use crate::index::claims::ClaimStore;
    use crate::ingest::datalake::Datalake;
    use crate::ingest::replication::ReplicationCoordinator;
    use crate::ingest::service::{IngestService, parse_book_summary, split_gutenberg_text};
    use crate::ingest::types::IngestStatus;
    use crate::membership::service::MembershipService;
    use crate::mq::queue::MessageQueue;
    use crate::mq::types::QUEUE_INGESTED;
    use crate::search::types::BookSummary;

    use axum::{Router, http::StatusCode, routing::post};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const PUSH_TIMEOUT: Duration = Duration::from_millis(800);

    /// A peer that acknowledges every replica push.
    async fn spawn_ack_peer() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new().route(
            "/internal/replica/:date/:hour/:book_id",
            post(|| async { StatusCode::OK }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    /// Nothing listens here; pushes fail with connection refused.
    fn dead_peer() -> String {
        "http://127.0.0.1:9".to_string()
    }

    struct TestIngest {
        _lake: TempDir,
        claims: Arc<ClaimStore>,
        catalog: Arc<dyn KeyValueStore<u32, BookSummary>>,
        queue: Arc<MessageQueue>,
        service: Arc<IngestService>,
    }

    async fn build_service(replication_factor: usize, peers: Vec<String>) -> TestIngest {
        let membership = MembershipService::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:18099".parse().unwrap(),
            vec![],
        )
        .await
        .unwrap();
        let partitioner = PartitionManager::new(membership.clone(), 1);
        let queue = MessageQueue::new(membership, partitioner);

        let claims = Arc::new(ClaimStore::new(Arc::new(LocalSet::new())));
        let catalog: Arc<dyn KeyValueStore<u32, BookSummary>> = Arc::new(LocalKv::new());
        let lake = tempfile::tempdir().unwrap();

        let service = IngestService::new(
            claims.clone(),
            Datalake::new(lake.path().to_path_buf()),
            ReplicationCoordinator::with_timeout("node-a".to_string(), PUSH_TIMEOUT),
            queue.clone(),
            catalog.clone(),
            "node-a".to_string(),
            replication_factor,
            peers,
        );

        TestIngest {
            _lake: lake,
            claims,
            catalog,
            queue,
            service,
        }
    }

    const SAMPLE_TEXT: &str = "Title: Test Book\n\
Author: Test Author\n\
Language: English\n\
Release Date: June 1, 1998 [EBook #7]\n\
\n\
*** START OF THE PROJECT GUTENBERG EBOOK TEST BOOK ***\n\
the cat sat on the mat\n\
*** END OF THE PROJECT GUTENBERG EBOOK TEST BOOK ***\n\
End of this Project Gutenberg eBook.\n";

    // ============================================================
    // REPLICATION QUORUM
    // ============================================================

    #[tokio::test]
    async fn test_replication_factor_one_needs_no_peers() {
        let coordinator =
            ReplicationCoordinator::with_timeout("node-a".to_string(), PUSH_TIMEOUT);

        let replicas = coordinator
            .replicate(7, "20260112", "23", "{}", 1, &[])
            .await
            .unwrap();
        assert_eq!(replicas, vec!["node-a".to_string()]);
    }

    #[tokio::test]
    async fn test_replication_reaches_quorum_with_live_peer() {
        let peer = spawn_ack_peer().await;
        let coordinator =
            ReplicationCoordinator::with_timeout("node-a".to_string(), PUSH_TIMEOUT);

        let replicas = coordinator
            .replicate(7, "20260112", "23", "{}", 2, &[peer.clone()])
            .await
            .unwrap();
        assert_eq!(replicas, vec!["node-a".to_string(), peer]);
    }

    #[tokio::test]
    async fn test_replication_stops_once_quorum_met() {
        let peer = spawn_ack_peer().await;
        let coordinator =
            ReplicationCoordinator::with_timeout("node-a".to_string(), PUSH_TIMEOUT);

        // The dead peer is never needed: the live one completes the quorum
        let replicas = coordinator
            .replicate(7, "20260112", "23", "{}", 2, &[peer.clone(), dead_peer()])
            .await
            .unwrap();
        assert_eq!(replicas, vec!["node-a".to_string(), peer]);
    }

    #[tokio::test]
    async fn test_replication_shortfall_is_reported_not_partial_success() {
        let peer = spawn_ack_peer().await;
        let coordinator =
            ReplicationCoordinator::with_timeout("node-a".to_string(), PUSH_TIMEOUT);

        // Factor 3 needs two remote copies; only one of the two peers answers
        let err = coordinator
            .replicate(7, "20260112", "23", "{}", 3, &[peer, dead_peer()])
            .await
            .unwrap_err();

        assert_eq!(err.replicated_total, 2);
        assert_eq!(err.needed_total, 3);
        assert_eq!(err.attempted_peers.len(), 2);
    }

    // ============================================================
    // INGESTION FLOW
    // ============================================================

    #[tokio::test]
    async fn test_quorum_shortfall_aborts_ingestion_and_releases_claim() {
        let ingest = build_service(3, vec![dead_peer()]).await;

        assert!(ingest.claims.try_claim(42).await);
        let response = ingest.service.ingest_downloaded(42, SAMPLE_TEXT).await;

        assert_eq!(response.status, IngestStatus::DownloadedButReplicationFailed);
        assert_eq!(response.replicated_total, Some(1));
        assert_eq!(response.needed_total, Some(3));

        // No event may advance the pipeline on partial replication
        assert!(ingest.queue.pending(QUEUE_INGESTED).is_empty());

        // The claim was released, so a retry is possible
        assert!(ingest.claims.try_claim(42).await);
    }

    #[tokio::test]
    async fn test_ingest_downloaded_persists_publishes_and_releases() {
        let ingest = build_service(1, vec![]).await;

        assert!(ingest.claims.try_claim(7).await);
        let response = ingest.service.ingest_downloaded(7, SAMPLE_TEXT).await;

        assert_eq!(response.status, IngestStatus::Downloaded);
        assert_eq!(response.event_sent, Some(true));
        assert_eq!(response.replicas, Some(vec!["node-a".to_string()]));

        // Durable copy in the datalake
        assert!(ingest.service.datalake().find_file(7).is_some());
        assert_eq!(ingest.service.datalake().list_books(), vec![7]);

        // Catalog entry parsed from the header
        let summary = ingest.catalog.get(&7).await.unwrap().unwrap();
        assert_eq!(summary.title, "Test Book");
        assert_eq!(summary.author, "Test Author");
        assert_eq!(summary.year, Some(1998));

        // Ingested event is queued for the indexer
        let pending = ingest.queue.pending(QUEUE_INGESTED);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.event.book_id, 7);
        assert_eq!(pending[0].1.event.replicas, vec!["node-a".to_string()]);

        // Short-lived claim: released after the event went out
        assert!(ingest.claims.try_claim(7).await);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_loses_claim_race() {
        let ingest = build_service(1, vec![]).await;

        // Someone else holds the claim and no local copy exists yet
        assert!(ingest.claims.try_claim(99).await);
        let response = ingest.service.ingest(99).await;

        assert_eq!(response.status, IngestStatus::AlreadyClaimed);
    }

    // ============================================================
    // TEXT PREPROCESSING
    // ============================================================

    #[test]
    fn test_split_gutenberg_text_with_markers() {
        let (header, content, footer) = split_gutenberg_text(SAMPLE_TEXT);

        assert!(header.starts_with("Title: Test Book"));
        assert!(content.contains("the cat sat on the mat"));
        assert!(!content.contains("*** END"));
        assert!(footer.contains("End of this Project Gutenberg eBook."));
    }

    #[test]
    fn test_split_without_markers_keeps_everything_as_content() {
        let (header, content, footer) = split_gutenberg_text("just some plain text\n");

        assert!(header.is_empty());
        assert_eq!(content, "just some plain text");
        assert!(footer.is_empty());
    }

    #[test]
    fn test_parse_book_summary_extracts_fields() {
        let header = "Title: Alice's Adventures in Wonderland\n\
Author: Lewis Carroll\n\
Language: English\n\
Release Date: June 25, 2008 [EBook #11]";

        let summary = parse_book_summary(header, 11);
        assert_eq!(summary.title, "Alice's Adventures in Wonderland");
        assert_eq!(summary.author, "Lewis Carroll");
        assert_eq!(summary.language, "English");
        assert_eq!(summary.year, Some(2008));
    }

    #[test]
    fn test_parse_book_summary_defaults_for_missing_fields() {
        let summary = parse_book_summary("no structured header here", 1342);

        assert_eq!(summary.title, "Book 1342");
        assert_eq!(summary.author, "Unknown");
        assert_eq!(summary.language, "unknown");
        assert_eq!(summary.year, None);
    }
}
