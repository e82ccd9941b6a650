//! Cluster Lock Service
//!
//! Named, lease-based mutual exclusion in the same idiom the message queue uses
//! for work claims: the partition primary of a lock name holds its lease table,
//! other nodes route acquire/release over HTTP. A lease that is never released
//! (crashed holder) expires and the name becomes acquirable again.
//!
//! Consensus-grade locking is only offered while the cluster has at least
//! [`CONSENSUS_QUORUM`] alive members; below that the metadata store falls back
//! to node-local mutexes.

use super::net::HttpGateway;
use super::partitioner::PartitionManager;
use super::protocol::{
    ENDPOINT_LOCK_ACQUIRE, ENDPOINT_LOCK_RELEASE, LockAcquireRequest, LockAcquireResponse,
    LockReleaseRequest,
};
use crate::membership::{service::MembershipService, types::NodeId};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Minimum alive members for the lock service to count as consensus-backed.
pub const CONSENSUS_QUORUM: usize = 3;

const LEASE_TTL_MS: u64 = 30_000;
const ACQUIRE_DEADLINE: Duration = Duration::from_secs(10);
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const HTTP_TIMEOUT: Duration = Duration::from_millis(500);

/// Fencing token identifying one granted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// Cluster-wide mutual exclusion primitive.
///
/// `acquire` blocks (polling) until the lock is granted or a deadline passes;
/// an `Err` from either operation means the primitive itself is unavailable,
/// which callers treat as permanent degradation.
#[async_trait]
pub trait ConsensusLock: Send + Sync {
    fn quorum_available(&self) -> bool;
    async fn acquire(&self, name: &str) -> Result<LockToken>;
    async fn release(&self, name: &str, token: &LockToken) -> Result<()>;
}

struct Lease {
    token: String,
    expires_at: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct LeaseLockService {
    leases: DashMap<String, Lease>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    http: HttpGateway,
    lease_ttl_ms: u64,
    acquire_deadline: Duration,
}

impl LeaseLockService {
    pub fn new(membership: Arc<MembershipService>, partitioner: Arc<PartitionManager>) -> Arc<Self> {
        Self::with_timing(membership, partitioner, LEASE_TTL_MS, ACQUIRE_DEADLINE)
    }

    /// Timing knobs exposed for tests.
    pub fn with_timing(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        lease_ttl_ms: u64,
        acquire_deadline: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            leases: DashMap::new(),
            membership,
            partitioner,
            http: HttpGateway::new(),
            lease_ttl_ms,
            acquire_deadline,
        })
    }

    /// Primary-side grant attempt. Returns the lease token on success, `None`
    /// while another unexpired lease holds the name.
    pub fn try_acquire_local(&self, name: &str) -> Option<LockToken> {
        let mut entry = self
            .leases
            .entry(name.to_string())
            .or_insert_with(|| Lease {
                token: String::new(),
                expires_at: 0,
            });

        if !entry.token.is_empty() && entry.expires_at > now_ms() {
            return None;
        }

        let token = Uuid::new_v4().to_string();
        entry.token = token.clone();
        entry.expires_at = now_ms() + self.lease_ttl_ms;
        Some(LockToken(token))
    }

    /// Primary-side release; token-checked so a stale holder cannot release a
    /// lease it no longer owns.
    pub fn release_local(&self, name: &str, token: &str) -> bool {
        if let Some(entry) = self.leases.get(name) {
            if entry.token != token {
                return false;
            }
        } else {
            return false;
        }
        self.leases.remove(name);
        true
    }

    fn owner_of(&self, name: &str) -> Result<NodeId> {
        let partition = self.partitioner.get_partition(name);
        let owners = self.partitioner.get_owners(partition);
        owners
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No alive nodes own lock {}", name))
    }

    fn peer_http(&self, node_id: &NodeId) -> Result<std::net::SocketAddr> {
        self.membership
            .get_member(node_id)
            .map(|node| node.http_addr)
            .ok_or_else(|| anyhow::anyhow!("Lock owner not found: {:?}", node_id))
    }
}

#[async_trait]
impl ConsensusLock for LeaseLockService {
    fn quorum_available(&self) -> bool {
        self.membership.has_quorum(CONSENSUS_QUORUM)
    }

    async fn acquire(&self, name: &str) -> Result<LockToken> {
        let deadline = Instant::now() + self.acquire_deadline;

        loop {
            let owner = self.owner_of(name)?;

            let granted = if owner == self.membership.local_node.id {
                self.try_acquire_local(name)
            } else {
                let addr = self.peer_http(&owner)?;
                let payload = LockAcquireRequest {
                    name: name.to_string(),
                    ttl_ms: self.lease_ttl_ms,
                };
                let response = self
                    .http
                    .post_json_with_retry(
                        format!("http://{}{}", addr, ENDPOINT_LOCK_ACQUIRE),
                        &payload,
                        HTTP_TIMEOUT,
                        3,
                    )
                    .await?;
                if !response.status().is_success() {
                    return Err(anyhow::anyhow!(
                        "Lock acquire failed: {}",
                        response.status()
                    ));
                }
                let body: LockAcquireResponse = response.json().await?;
                body.token.map(LockToken)
            };

            if let Some(token) = granted {
                return Ok(token);
            }
            if Instant::now() >= deadline {
                return Err(anyhow::anyhow!("Timed out acquiring lock {}", name));
            }
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
        }
    }

    async fn release(&self, name: &str, token: &LockToken) -> Result<()> {
        let owner = self.owner_of(name)?;

        if owner == self.membership.local_node.id {
            if !self.release_local(name, &token.0) {
                tracing::warn!("Release of {} with stale token ignored", name);
            }
            return Ok(());
        }

        let addr = self.peer_http(&owner)?;
        let payload = LockReleaseRequest {
            name: name.to_string(),
            token: token.0.clone(),
        };
        let response = self
            .http
            .post_json_with_retry(
                format!("http://{}{}", addr, ENDPOINT_LOCK_RELEASE),
                &payload,
                HTTP_TIMEOUT,
                3,
            )
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Lock release failed: {}", response.status()));
        }
        Ok(())
    }
}
