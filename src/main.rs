use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use gutenberg_cluster::grid::handlers::*;
use gutenberg_cluster::grid::lock::{ConsensusLock, LeaseLockService};
use gutenberg_cluster::grid::partitioner::PartitionManager;
use gutenberg_cluster::grid::protocol::*;
use gutenberg_cluster::grid::replicated::{ReplicatedMap, ReplicatedSet};
use gutenberg_cluster::grid::store::KeyValueStore;
use gutenberg_cluster::index::artifact::IndexLoader;
use gutenberg_cluster::index::cache::HashCache;
use gutenberg_cluster::index::claims::ClaimStore;
use gutenberg_cluster::index::coordinator::IndexingCoordinator;
use gutenberg_cluster::index::handlers::{
    handle_global_merge, handle_index, handle_index_merge, handle_index_postings,
    handle_index_replicate_merge, handle_metadata_get, handle_metadata_list,
};
use gutenberg_cluster::index::inverted::{InvertedIndex, ReplicatedInvertedIndex};
use gutenberg_cluster::index::merger::GlobalIndexMerger;
use gutenberg_cluster::index::metadata::DocumentMetadataStore;
use gutenberg_cluster::index::types::DocumentMetadata;
use gutenberg_cluster::ingest::datalake::Datalake;
use gutenberg_cluster::ingest::handlers::{
    handle_ingest, handle_ingest_list, handle_ingest_status, handle_replica_receive,
};
use gutenberg_cluster::ingest::replication::ReplicationCoordinator;
use gutenberg_cluster::ingest::service::IngestService;
use gutenberg_cluster::membership::service::MembershipService;
use gutenberg_cluster::mq::consumer::IngestConsumer;
use gutenberg_cluster::mq::handlers::{handle_forward_publish, handle_replicate_message};
use gutenberg_cluster::mq::protocol::{ENDPOINT_MQ_FORWARD, ENDPOINT_MQ_REPLICATE};
use gutenberg_cluster::mq::queue::MessageQueue;
use gutenberg_cluster::search::handlers::handle_search;
use gutenberg_cluster::search::ranking::RankingEngine;
use gutenberg_cluster::search::types::BookSummary;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--peer <http://host:port>] \
             [--lake-root <dir>] [--index-root <dir>] [--replication-factor <n>] [--workers <n>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000 --peer http://127.0.0.1:6000",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut replica_peers: Vec<String> = vec![];
    let mut lake_root = PathBuf::from("data_repository/datalake");
    let mut index_root = PathBuf::from("data_repository/indexes");
    let mut replication_factor: usize = 2;
    let mut workers: usize = 4;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                seed_nodes.push(args[i + 1].parse()?);
                i += 2;
            }
            "--peer" => {
                replica_peers.push(args[i + 1].clone());
                i += 2;
            }
            "--lake-root" => {
                lake_root = PathBuf::from(&args[i + 1]);
                i += 2;
            }
            "--index-root" => {
                index_root = PathBuf::from(&args[i + 1]);
                i += 2;
            }
            "--replication-factor" => {
                replication_factor = args[i + 1].parse()?;
                i += 2;
            }
            "--workers" => {
                workers = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");
    let http_addr = SocketAddr::new(bind_addr.ip(), bind_addr.port() + 1000);

    tracing::info!("Starting node: gossip {} / http {}", bind_addr, http_addr);
    if seed_nodes.is_empty() {
        tracing::info!("Starting as seed node (founder)");
    } else {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    }

    // 1. Membership (UDP gossip)
    let membership = MembershipService::new(bind_addr, http_addr, seed_nodes).await?;
    let node_id = membership.local_node.id.0.clone();
    tracing::info!("Node ID: {}", node_id);
    membership.clone().start().await;

    // 2. Distributed substrate
    let partitioner = PartitionManager::new(membership.clone(), replication_factor);
    let locks = LeaseLockService::new(membership.clone(), partitioner.clone());

    let metadata_map: Arc<ReplicatedMap<u32, DocumentMetadata>> =
        ReplicatedMap::new(membership.clone(), partitioner.clone(), "/grid/metadata");
    let catalog_map: Arc<ReplicatedMap<u32, BookSummary>> =
        ReplicatedMap::new(membership.clone(), partitioner.clone(), "/grid/books");
    let hash_map: Arc<ReplicatedMap<u32, String>> =
        ReplicatedMap::new(membership.clone(), partitioner.clone(), "/grid/hashes");
    let claim_set: Arc<ReplicatedSet<u32>> =
        ReplicatedSet::new(membership.clone(), partitioner.clone(), "/grid/claims");
    let inverted = ReplicatedInvertedIndex::new(membership.clone(), partitioner.clone(), "/grid/index");
    let queue = MessageQueue::new(membership.clone(), partitioner.clone());

    // 3. Coordination layer
    let metadata_store = Arc::new(DocumentMetadataStore::new(
        metadata_map.clone() as Arc<dyn KeyValueStore<u32, DocumentMetadata>>,
        Some(locks.clone() as Arc<dyn ConsensusLock>),
    ));
    let hash_cache = Arc::new(HashCache::new(
        hash_map.clone() as Arc<dyn KeyValueStore<u32, String>>
    ));
    let inverted_dyn: Arc<dyn InvertedIndex> = inverted.clone();
    let catalog_dyn: Arc<dyn KeyValueStore<u32, BookSummary>> = catalog_map.clone();

    let coordinator = IndexingCoordinator::new(
        lake_root.clone(),
        index_root.clone(),
        inverted_dyn.clone(),
        metadata_store.clone(),
        hash_cache.clone(),
        node_id.clone(),
    );

    // Restore previously indexed data into the fresh in-memory index
    let loader = IndexLoader::new(index_root.clone(), inverted_dyn.clone(), hash_cache.clone());
    loader.load_all().await;

    let claims = Arc::new(ClaimStore::new(claim_set.clone()));
    let ingest_service = IngestService::new(
        claims,
        Datalake::new(lake_root.clone()),
        ReplicationCoordinator::new(node_id.clone()),
        queue.clone(),
        catalog_dyn.clone(),
        node_id.clone(),
        replication_factor,
        replica_peers,
    );

    let merger = Arc::new(GlobalIndexMerger::new(
        index_root.clone(),
        index_root
            .parent()
            .unwrap_or(&index_root)
            .join("inverted_index.json"),
    ));
    let ranking = Arc::new(RankingEngine::default());

    // 4. Consumer workers with cooperative shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    let consumer = IngestConsumer::new(queue.clone(), coordinator.clone(), shutdown.clone());
    consumer.start(workers).await;

    // 5. HTTP router
    let app = Router::new()
        // Public surface
        .route("/ingest/:book_id", post(handle_ingest))
        .route("/ingest/status/:book_id", get(handle_ingest_status))
        .route("/ingest/list", get(handle_ingest_list))
        .route("/index", post(handle_index))
        .route("/index/global", post(handle_global_merge))
        .route("/metadata/:book_id", get(handle_metadata_get))
        .route("/metadata", get(handle_metadata_list))
        .route("/search", get(handle_search))
        // Replica push between crawler nodes
        .route(
            "/internal/replica/:date/:hour/:book_id",
            post(handle_replica_receive),
        )
        // Grid: metadata map
        .route(
            &format!("/grid/metadata{}", ENDPOINT_FORWARD_PUT),
            post(handle_forward_put::<u32, DocumentMetadata>),
        )
        .route(
            &format!("/grid/metadata{}", ENDPOINT_REPLICATE),
            post(handle_replicate::<u32, DocumentMetadata>),
        )
        .route(
            &format!("/grid/metadata{}", ENDPOINT_FORWARD_REMOVE),
            post(handle_forward_remove::<u32, DocumentMetadata>),
        )
        .route(
            &format!("/grid/metadata{}", ENDPOINT_REPLICATE_REMOVE),
            post(handle_replicate_remove::<u32, DocumentMetadata>),
        )
        .route(
            &format!("/grid/metadata{}/:key", ENDPOINT_INTERNAL_GET),
            get(handle_internal_get::<u32, DocumentMetadata>),
        )
        // Grid: book catalog
        .route(
            &format!("/grid/books{}", ENDPOINT_FORWARD_PUT),
            post(handle_forward_put::<u32, BookSummary>),
        )
        .route(
            &format!("/grid/books{}", ENDPOINT_REPLICATE),
            post(handle_replicate::<u32, BookSummary>),
        )
        .route(
            &format!("/grid/books{}", ENDPOINT_FORWARD_REMOVE),
            post(handle_forward_remove::<u32, BookSummary>),
        )
        .route(
            &format!("/grid/books{}", ENDPOINT_REPLICATE_REMOVE),
            post(handle_replicate_remove::<u32, BookSummary>),
        )
        .route(
            &format!("/grid/books{}/:key", ENDPOINT_INTERNAL_GET),
            get(handle_internal_get::<u32, BookSummary>),
        )
        // Grid: hash cache backing map
        .route(
            &format!("/grid/hashes{}", ENDPOINT_FORWARD_PUT),
            post(handle_forward_put::<u32, String>),
        )
        .route(
            &format!("/grid/hashes{}", ENDPOINT_REPLICATE),
            post(handle_replicate::<u32, String>),
        )
        .route(
            &format!("/grid/hashes{}", ENDPOINT_FORWARD_REMOVE),
            post(handle_forward_remove::<u32, String>),
        )
        .route(
            &format!("/grid/hashes{}", ENDPOINT_REPLICATE_REMOVE),
            post(handle_replicate_remove::<u32, String>),
        )
        .route(
            &format!("/grid/hashes{}/:key", ENDPOINT_INTERNAL_GET),
            get(handle_internal_get::<u32, String>),
        )
        // Grid: claim set
        .route(
            &format!("/grid/claims{}", ENDPOINT_SET_ADD),
            post(handle_set_add::<u32>),
        )
        .route(
            &format!("/grid/claims{}", ENDPOINT_SET_REMOVE),
            post(handle_set_remove::<u32>),
        )
        .route(
            &format!("/grid/claims{}", ENDPOINT_SET_REPLICATE_ADD),
            post(handle_set_replicate_add::<u32>),
        )
        .route(
            &format!("/grid/claims{}", ENDPOINT_SET_REPLICATE_REMOVE),
            post(handle_set_replicate_remove::<u32>),
        )
        // Grid: inverted index
        .route("/grid/index/merge", post(handle_index_merge))
        .route("/grid/index/replicate_merge", post(handle_index_replicate_merge))
        .route("/grid/index/postings/:term", get(handle_index_postings))
        // Lock service
        .route(ENDPOINT_LOCK_ACQUIRE, post(handle_lock_acquire))
        .route(ENDPOINT_LOCK_RELEASE, post(handle_lock_release))
        // Message queue
        .route(ENDPOINT_MQ_FORWARD, post(handle_forward_publish))
        .route(ENDPOINT_MQ_REPLICATE, post(handle_replicate_message))
        .layer(Extension(metadata_map))
        .layer(Extension(catalog_map))
        .layer(Extension(hash_map))
        .layer(Extension(claim_set))
        .layer(Extension(inverted))
        .layer(Extension(inverted_dyn))
        .layer(Extension(catalog_dyn))
        .layer(Extension(locks))
        .layer(Extension(queue.clone()))
        .layer(Extension(coordinator))
        .layer(Extension(metadata_store))
        .layer(Extension(merger))
        .layer(Extension(ranking))
        .layer(Extension(ingest_service));

    // 6. Stats reporter
    let stats_membership = membership.clone();
    let stats_queue = queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            tracing::info!(
                "Cluster stats: {} alive nodes, {} queued messages locally",
                stats_membership.alive_count(),
                stats_queue.local_message_count()
            );
        }
    });

    // 7. HTTP server with cooperative shutdown
    tracing::info!("HTTP server listening on {}", http_addr);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;

    let shutdown_flag = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested, draining consumers");
            shutdown_flag.store(true, Ordering::SeqCst);
        })
        .await?;

    Ok(())
}
