//! Distributed Book Search Cluster Library
//!
//! This library crate defines the core modules that make up the distributed system.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of six loosely coupled subsystems:
//!
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip protocol
//!   (SWIM-like) to manage node discovery, failure detection, and cluster topology.
//! - **`grid`**: The distributed state substrate. Partition placement plus sharded,
//!   replicated in-memory stores (key-value, set) and a lease-based lock service,
//!   exposed behind capability traits so unit tests can run against in-process fakes.
//! - **`ingest`**: The data intake pipeline. Claims a book id, downloads content from
//!   Project Gutenberg, persists it to the datalake, replicates it to a quorum of
//!   peers and publishes an ingested event.
//! - **`index`**: The indexing coordination core. Content-hash idempotency, per-book
//!   locking with graceful degradation, the inverted index, per-book index artifacts
//!   and the global batch merger.
//! - **`search`**: The information retrieval logic. Tokenizers, the IDF ranking
//!   engine and query processing.
//! - **`mq`**: The message plumbing. A sharded, replicated, lease-based queue and the
//!   consumer loop that drives indexing off ingested events.

pub mod grid;
pub mod index;
pub mod ingest;
pub mod membership;
pub mod mq;
pub mod search;
