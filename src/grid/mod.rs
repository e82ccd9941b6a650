//! Distributed State Substrate
//!
//! Implements the shared-state layer the coordination logic runs on.
//!
//! ## Core Concepts
//! - **Partitioning**: Keys hash into a fixed set of partitions; `PartitionManager`
//!   assigns each partition a primary and backup owners from the alive-member list.
//! - **Capability traits**: `KeyValueStore`, `MemberSet` and `ConsensusLock` describe
//!   what the coordination layer needs from the substrate. Cluster-backed and
//!   in-process implementations are interchangeable; unit tests run against the
//!   in-process ones.
//! - **Replication**: Writes are routed to the partition primary (forwarded over HTTP
//!   when the local node does not own the key) and pushed to backups, deduplicated by
//!   operation id so retried requests cannot apply twice.
//! - **Locking**: `LeaseLockService` provides named, lease-based mutual exclusion
//!   routed to the partition owner of the lock name, usable only while the cluster
//!   has a quorum of members.

pub mod handlers;
pub mod lock;
pub mod net;
pub mod partitioner;
pub mod protocol;
pub mod replicated;
pub mod store;
