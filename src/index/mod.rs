//! Indexing Coordination Module
//!
//! The core of the system: makes indexing correct under concurrent, multi-node
//! execution.
//!
//! ## Overview
//! - **`claims`**: at-most-one-claim semantics over the distributed set, failing
//!   open to node-local exclusivity when the substrate is unreachable.
//! - **`metadata`**: per-book metadata plus the lock factory that prefers the
//!   cluster consensus lock and degrades, observably, to a local mutex.
//! - **`hasher`**: the SHA-256 content hash that makes re-indexing idempotent.
//! - **`cache`**: the explicit book-id -> hash lookup cache (constructor-injected
//!   backing store, explicit invalidation).
//! - **`inverted`**: the term -> postings structure with a commutative,
//!   duplicate-free merge.
//! - **`coordinator`**: the state machine that ties the above together for one
//!   document: resolve, lock, hash-compare, tokenize, merge, persist, release.
//! - **`artifact`**: per-book index files and the startup loader.
//! - **`merger`**: the batch reconciliation of per-book artifacts into one
//!   canonical hierarchical index.

pub mod artifact;
pub mod cache;
pub mod claims;
pub mod coordinator;
pub mod handlers;
pub mod hasher;
pub mod inverted;
pub mod merger;
pub mod metadata;
pub mod types;

#[cfg(test)]
mod tests;
