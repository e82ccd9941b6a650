use super::net::HttpGateway;
use super::partitioner::PartitionManager;
use super::protocol::*;
use super::store::{KeyValueStore, MemberSet};
use crate::membership::{service::MembershipService, types::NodeId};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const OP_TIMEOUT: Duration = Duration::from_millis(500);
const OP_ATTEMPTS: usize = 3;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Cluster-backed key-value store.
///
/// Data lives in partitioned `DashMap`s on the partition owners. A write lands
/// on the primary (forwarded over HTTP when the local node is not the owner)
/// and is pushed synchronously to the backups. Reads prefer local data and
/// fall back to querying the owners.
pub struct ReplicatedMap<K, V> {
    partitions: Arc<DashMap<u32, DashMap<K, V>>>,
    processed_ops: Arc<DashMap<String, u64>>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    http: HttpGateway,
    base_path: String,
}

impl<K, V> ReplicatedMap<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// `base_path` namespaces this store's internode endpoints, e.g.
    /// `/grid/metadata`.
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

    /// Idempotency gate for replicated/forwarded operations.
    fn should_process(&self, op_id: &str) -> bool {
        if self.processed_ops.contains_key(op_id) {
            return false;
        }
        if self.processed_ops.len() > 10_000 {
            self.processed_ops.clear();
        }
        self.processed_ops.insert(op_id.to_string(), now_ms());
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

    pub fn store_local(&self, partition: u32, key: K, value: V) {
        self.partitions
            .entry(partition)
            .or_insert_with(DashMap::new)
            .insert(key, value);
    }

    pub fn remove_local(&self, partition: u32, key: &K) {
        if let Some(partition_map) = self.partitions.get(&partition) {
            partition_map.remove(key);
        }
    }

    pub fn get_local(&self, key: &K) -> Option<V> {
        let partition = self.partitioner.get_partition(&key.to_string());
        self.partitions
            .get(&partition)
            .and_then(|map| map.get(key).map(|entry| entry.value().clone()))
    }

    pub fn local_entry_count(&self) -> usize {
        self.partitions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Primary-side write: apply locally, then push to every backup.
    pub async fn store_as_primary(
        &self,
        partition: u32,
        op_id: String,
        key: K,
        value: V,
    ) -> Result<()> {
        if !self.should_process(&op_id) {
            return Ok(());
        }
        self.store_local(partition, key.clone(), value.clone());

        for backup in self.partitioner.get_owners(partition).iter().skip(1) {
            self.replicate_to_backup(backup, partition, op_id.clone(), key.clone(), value.clone())
                .await?;
        }
        Ok(())
    }

    pub fn store_replica(&self, partition: u32, op_id: String, key: K, value: V) {
        if !self.should_process(&op_id) {
            return;
        }
        self.store_local(partition, key, value);
    }

    pub async fn remove_as_primary(&self, partition: u32, op_id: String, key: &K) -> Result<()> {
        if !self.should_process(&op_id) {
            return Ok(());
        }
        self.remove_local(partition, key);

        let payload = RemoveRequest {
            partition,
            op_id: op_id.clone(),
            key: key.to_string(),
        };
        for backup in self.partitioner.get_owners(partition).iter().skip(1) {
            let url = self.peer_url(backup, ENDPOINT_REPLICATE_REMOVE)?;
            let response = self
                .http
                .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
                .await?;
            if !response.status().is_success() {
                return Err(anyhow::anyhow!(
                    "Remove replication failed: {}",
                    response.status()
                ));
            }
        }
        Ok(())
    }

    pub fn remove_replica(&self, partition: u32, op_id: String, key: &K) {
        if !self.should_process(&op_id) {
            return;
        }
        self.remove_local(partition, key);
    }

    async fn replicate_to_backup(
        &self,
        backup: &NodeId,
        partition: u32,
        op_id: String,
        key: K,
        value: V,
    ) -> Result<()> {
        let payload = ReplicateRequest {
            partition,
            op_id,
            key: key.to_string(),
            value_json: serde_json::to_string(&value)?,
        };
        let url = self.peer_url(backup, ENDPOINT_REPLICATE)?;
        let response = self
            .http
            .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Replication failed: {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn forward_put(
        &self,
        primary: &NodeId,
        partition: u32,
        op_id: String,
        key: K,
        value: V,
    ) -> Result<()> {
        let payload = ForwardPutRequest {
            partition,
            op_id,
            key: key.to_string(),
            value_json: serde_json::to_string(&value)?,
        };
        let url = self.peer_url(primary, ENDPOINT_FORWARD_PUT)?;
        let response = self
            .http
            .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("ForwardPut failed: {}", response.status()));
        }
        Ok(())
    }

    async fn fetch_remote(&self, owner: &NodeId, key: &K) -> Result<Option<V>> {
        let url = format!(
            "{}/{}",
            self.peer_url(owner, ENDPOINT_INTERNAL_GET)?,
            key.to_string()
        );
        let response = self.http.get_with_retry(url, OP_TIMEOUT, OP_ATTEMPTS).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("GET request failed {}", response.status()));
        }

        let get_response: GetResponse = response.json().await?;
        match get_response.value_json {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    pub async fn put_with_op(&self, key: K, value: V, op_id: String) -> Result<()> {
        if !self.should_process(&op_id) {
            return Ok(());
        }
        let partition = self.partitioner.get_partition(&key.to_string());
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() {
            tracing::warn!("No alive nodes, storing locally as fallback");
            self.store_local(partition, key, value);
            return Ok(());
        }

        if owners[0] == self.membership.local_node.id {
            self.store_local(partition, key.clone(), value.clone());
            for backup in owners.iter().skip(1) {
                self.replicate_to_backup(
                    backup,
                    partition,
                    op_id.clone(),
                    key.clone(),
                    value.clone(),
                )
                .await?;
            }
        } else {
            self.forward_put(&owners[0], partition, op_id, key, value)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<K, V> KeyValueStore<K, V> for ReplicatedMap<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>> {
        if let Some(value) = self.get_local(key) {
            return Ok(Some(value));
        }

        let partition = self.partitioner.get_partition(&key.to_string());
        let owners = self.partitioner.get_owners(partition);
        let mut last_err = None;

        for owner in owners.iter().filter(|o| **o != self.membership.local_node.id) {
            match self.fetch_remote(owner, key).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("Fetch from {:?} failed: {}", owner, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            // Every reachable owner answered "absent"
            None => Ok(None),
            Some(e) => Err(e),
        }
    }

    async fn put(&self, key: K, value: V) -> Result<()> {
        self.put_with_op(key, value, Uuid::new_v4().to_string()).await
    }

    async fn remove(&self, key: &K) -> Result<()> {
        let op_id = Uuid::new_v4().to_string();
        let partition = self.partitioner.get_partition(&key.to_string());
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() || owners[0] == self.membership.local_node.id {
            return self.remove_as_primary(partition, op_id, key).await;
        }

        let payload = RemoveRequest {
            partition,
            op_id,
            key: key.to_string(),
        };
        let url = self.peer_url(&owners[0], ENDPOINT_FORWARD_REMOVE)?;
        let response = self
            .http
            .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("ForwardRemove failed: {}", response.status()));
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<(K, V)> {
        self.partitions
            .iter()
            .flat_map(|partition| {
                partition
                    .value()
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Cluster-backed set with add-if-absent routed through the partition primary,
/// which makes concurrent adds of the same value race on one `DashMap` entry
/// and therefore yields exactly one winner.
pub struct ReplicatedSet<K> {
    partitions: Arc<DashMap<u32, DashMap<K, ()>>>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    http: HttpGateway,
    base_path: String,
}

impl<K> ReplicatedSet<K>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
{
    pub fn new(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        base_path: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            partitions: Arc::new(DashMap::new()),
            membership,
            partitioner,
            http: HttpGateway::new(),
            base_path: base_path.trim_end_matches('/').to_string(),
        })
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

    /// Primary-side add. Returns true iff the value was absent.
    pub async fn add_as_primary(&self, partition: u32, key: K) -> Result<bool> {
        let inserted = self
            .partitions
            .entry(partition)
            .or_insert_with(DashMap::new)
            .insert(key.clone(), ())
            .is_none();

        if inserted {
            let payload = SetAddRequest {
                key: key.to_string(),
            };
            for backup in self.partitioner.get_owners(partition).iter().skip(1) {
                let url = self.peer_url(backup, ENDPOINT_SET_REPLICATE_ADD)?;
                // Best effort; the primary remains authoritative for claims
                if let Err(e) = self
                    .http
                    .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
                    .await
                {
                    tracing::warn!("Set replication to {:?} failed: {}", backup, e);
                }
            }
        }
        Ok(inserted)
    }

    pub fn apply_replica_add(&self, partition: u32, key: K) {
        self.partitions
            .entry(partition)
            .or_insert_with(DashMap::new)
            .insert(key, ());
    }

    pub async fn remove_as_primary(&self, partition: u32, key: &K) -> Result<()> {
        if let Some(partition_map) = self.partitions.get(&partition) {
            partition_map.remove(key);
        }

        let payload = SetRemoveRequest {
            key: key.to_string(),
        };
        for backup in self.partitioner.get_owners(partition).iter().skip(1) {
            let url = self.peer_url(backup, ENDPOINT_SET_REPLICATE_REMOVE)?;
            if let Err(e) = self
                .http
                .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
                .await
            {
                tracing::warn!("Set removal replication to {:?} failed: {}", backup, e);
            }
        }
        Ok(())
    }

    pub fn apply_replica_remove(&self, partition: u32, key: &K) {
        if let Some(partition_map) = self.partitions.get(&partition) {
            partition_map.remove(key);
        }
    }
}

#[async_trait]
impl<K> MemberSet<K> for ReplicatedSet<K>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
{
    async fn add_if_absent(&self, value: K) -> Result<bool> {
        let partition = self.partitioner.get_partition(&value.to_string());
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() || owners[0] == self.membership.local_node.id {
            return self.add_as_primary(partition, value).await;
        }

        let payload = SetAddRequest {
            key: value.to_string(),
        };
        let url = self.peer_url(&owners[0], ENDPOINT_SET_ADD)?;
        let response = self
            .http
            .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Set add failed: {}", response.status()));
        }
        let body: SetAddResponse = response.json().await?;
        Ok(body.inserted)
    }

    async fn remove(&self, value: &K) -> Result<()> {
        let partition = self.partitioner.get_partition(&value.to_string());
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() || owners[0] == self.membership.local_node.id {
            return self.remove_as_primary(partition, value).await;
        }

        let payload = SetRemoveRequest {
            key: value.to_string(),
        };
        let url = self.peer_url(&owners[0], ENDPOINT_SET_REMOVE)?;
        let response = self
            .http
            .post_json_with_retry(url, &payload, OP_TIMEOUT, OP_ATTEMPTS)
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Set remove failed: {}", response.status()));
        }
        Ok(())
    }
}
