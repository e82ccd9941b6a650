//! Inverted Index Store
//!
//! The multi-valued term -> postings structure shared by all indexing workers.
//! The only write operation is `merge`, which is commutative and associative
//! per `(term, book_id)` pair: concurrent workers indexing different books can
//! interleave freely, and a retried merge with the same op id applies once.

use crate::grid::net::HttpGateway;
use crate::grid::partitioner::{PartitionManager, partition_of};
use crate::membership::{service::MembershipService, types::NodeId};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const OP_TIMEOUT: Duration = Duration::from_millis(500);
const OP_ATTEMPTS: usize = 3;

/// Occurrences of one term in one book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    pub book_id: u32,
    pub count: u32,
}

/// Capability trait for the inverted index, a multi-valued distributed map.
#[async_trait]
pub trait InvertedIndex: Send + Sync {
    /// Upsert: an existing `(term, book_id)` posting accumulates the count,
    /// otherwise a fresh posting is inserted.
    async fn merge(&self, term: &str, posting: Posting) -> Result<()>;

    async fn postings(&self, term: &str) -> Result<Vec<Posting>>;

    /// Posting-list size; the rarity signal for ranking.
    async fn document_frequency(&self, term: &str) -> Result<usize> {
        Ok(self.postings(term).await?.len())
    }
}

fn merge_into(postings: &mut Vec<Posting>, posting: Posting) {
    match postings.iter_mut().find(|p| p.book_id == posting.book_id) {
        Some(existing) => existing.count += posting.count,
        None => postings.push(posting),
    }
}

/// In-process index, also the unit-test substrate.
pub struct LocalInvertedIndex {
    terms: DashMap<String, Vec<Posting>>,
}

impl LocalInvertedIndex {
    pub fn new() -> Self {
        Self {
            terms: DashMap::new(),
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }
}

impl Default for LocalInvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvertedIndex for LocalInvertedIndex {
    async fn merge(&self, term: &str, posting: Posting) -> Result<()> {
        if term.is_empty() {
            return Ok(());
        }
        merge_into(
            self.terms.entry(term.to_string()).or_default().value_mut(),
            posting,
        );
        Ok(())
    }

    async fn postings(&self, term: &str) -> Result<Vec<Posting>> {
        Ok(self
            .terms
            .get(term)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

// --- Internode protocol for the cluster-backed index ---

pub const ENDPOINT_INDEX_MERGE: &str = "/merge";
pub const ENDPOINT_INDEX_REPLICATE_MERGE: &str = "/replicate_merge";
pub const ENDPOINT_INDEX_POSTINGS: &str = "/postings";

#[derive(Debug, Serialize, Deserialize)]
pub struct MergePostingRequest {
    pub partition: u32,
    pub op_id: String,
    pub term: String,
    pub book_id: u32,
    pub count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostingsResponse {
    pub postings: Vec<Posting>,
}

/// Cluster-backed index: terms partition across the alive nodes; merges are
/// applied by the partition primary (forwarded when necessary) and pushed to
/// backups, deduplicated by op id.
pub struct ReplicatedInvertedIndex {
    partitions: Arc<DashMap<u32, DashMap<String, Vec<Posting>>>>,
    processed_ops: Arc<DashMap<String, u64>>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    http: HttpGateway,
    base_path: String,
}

impl ReplicatedInvertedIndex {
    pub fn new(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        base_path: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            partitions: Arc::new(DashMap::new()),
            processed_ops: Arc::new(DashMap::new()),
            membership,
            partitioner,
            http: HttpGateway::new(),
            base_path: base_path.trim_end_matches('/').to_string(),
        })
    }

    fn should_process(&self, op_id: &str) -> bool {
        if self.processed_ops.contains_key(op_id) {
            return false;
        }
        if self.processed_ops.len() > 10_000 {
            self.processed_ops.clear();
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.processed_ops.insert(op_id.to_string(), now);
        true
    }

    fn peer_url(&self, node_id: &NodeId, endpoint: &str) -> Result<String> {
        let node = self
            .membership
            .get_member(node_id)
            .ok_or_else(|| anyhow::anyhow!("Node not found: {:?}", node_id))?;
        Ok(format!(
            "http://{}{}{}",
            node.http_addr, self.base_path, endpoint
        ))
    }

    fn merge_local(&self, partition: u32, term: &str, posting: Posting) {
        merge_into(
            self.partitions
                .entry(partition)
                .or_insert_with(DashMap::new)
                .entry(term.to_string())
                .or_default()
                .value_mut(),
            posting,
        );
    }

    /// Primary-side merge: apply locally, then push the same delta to backups.
    /// Backup pushes are best-effort; the structure is eventually merged and
    /// the primary stays authoritative for reads.
    pub async fn merge_as_primary(
        &self,
        partition: u32,
        op_id: String,
        term: &str,
        posting: Posting,
    ) -> Result<()> {
        if !self.should_process(&op_id) {
            return Ok(());
        }
        self.merge_local(partition, term, posting.clone());

        let payload = MergePostingRequest {
            partition,
            op_id,
            term: term.to_string(),
            book_id: posting.book_id,
            count: posting.count,
        };
        for backup in self.partitioner.get_owners(partition).iter().skip(1) {
            match self.peer_url(backup, ENDPOINT_INDEX_REPLICATE_MERGE) {
                Ok(url) => {
                    if let Err(e) = self
                        .http
                        .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
                        .await
                    {
                        tracing::warn!("Posting replication to {:?} failed: {}", backup, e);
                    }
                }
                Err(e) => tracing::warn!("Posting replication skipped: {}", e),
            }
        }
        Ok(())
    }

    pub fn apply_replica_merge(&self, partition: u32, op_id: String, term: &str, posting: Posting) {
        if !self.should_process(&op_id) {
            return;
        }
        self.merge_local(partition, term, posting);
    }

    fn postings_local(&self, partition: u32, term: &str) -> Option<Vec<Posting>> {
        self.partitions
            .get(&partition)
            .and_then(|map| map.get(term).map(|entry| entry.value().clone()))
    }

    /// Local-only lookup for the internode postings endpoint; never forwards,
    /// so remote reads cannot loop between nodes.
    pub fn postings_local_for(&self, term: &str) -> Option<Vec<Posting>> {
        self.postings_local(partition_of(term), term)
    }

    pub fn local_term_count(&self) -> usize {
        self.partitions.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl InvertedIndex for ReplicatedInvertedIndex {
    async fn merge(&self, term: &str, posting: Posting) -> Result<()> {
        if term.is_empty() {
            return Ok(());
        }
        let partition = partition_of(term);
        let owners = self.partitioner.get_owners(partition);
        let op_id = Uuid::new_v4().to_string();

        if owners.is_empty() {
            tracing::warn!("No alive nodes, merging posting locally as fallback");
            self.merge_local(partition, term, posting);
            return Ok(());
        }

        if owners[0] == self.membership.local_node.id {
            return self.merge_as_primary(partition, op_id, term, posting).await;
        }

        let payload = MergePostingRequest {
            partition,
            op_id,
            term: term.to_string(),
            book_id: posting.book_id,
            count: posting.count,
        };
        let url = self.peer_url(&owners[0], ENDPOINT_INDEX_MERGE)?;
        let response = self
            .http
            .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Posting merge forward failed: {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn postings(&self, term: &str) -> Result<Vec<Posting>> {
        let partition = partition_of(term);

        if let Some(postings) = self.postings_local(partition, term) {
            return Ok(postings);
        }

        let owners = self.partitioner.get_owners(partition);
        if owners.is_empty() || owners[0] == self.membership.local_node.id {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/{}",
            self.peer_url(&owners[0], ENDPOINT_INDEX_POSTINGS)?,
            term
        );
        let response = self.http.get_with_retry(url, OP_TIMEOUT, OP_ATTEMPTS).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Posting lookup failed: {}",
                response.status()
            ));
        }

        let body: PostingsResponse = response.json().await?;
        Ok(body.postings)
    }
}
