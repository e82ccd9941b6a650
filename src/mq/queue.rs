use super::protocol::{
    ENDPOINT_MQ_FORWARD, ENDPOINT_MQ_REPLICATE, ForwardPublishRequest, ReplicateMessageRequest,
};
use super::types::{IngestEvent, MessageEntry, MessageId, MessageStatus, now_ms};
use crate::grid::net::HttpGateway;
use crate::grid::partitioner::PartitionManager;
use crate::membership::{service::MembershipService, types::NodeId};

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

const OP_TIMEOUT: Duration = Duration::from_millis(500);
const OP_ATTEMPTS: usize = 3;
const DEFAULT_LEASE_TTL_MS: u64 = 30_000;

/// The sharded, replicated message store.
///
/// Message ids double as idempotency keys: storing an id that is already
/// present is a no-op, so a replayed forward or replication request cannot
/// duplicate a message.
pub struct MessageQueue {
    local_messages: Arc<DashMap<u32, DashMap<MessageId, MessageEntry>>>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    http: HttpGateway,
    lease_ttl_ms: u64,
}

impl MessageQueue {
    pub fn new(membership: Arc<MembershipService>, partitioner: Arc<PartitionManager>) -> Arc<Self> {
        Self::with_lease_ttl(membership, partitioner, DEFAULT_LEASE_TTL_MS)
    }

    pub fn with_lease_ttl(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        lease_ttl_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_messages: Arc::new(DashMap::new()),
            membership,
            partitioner,
            http: HttpGateway::new(),
            lease_ttl_ms,
        })
    }

    /// Enqueues an event. The message lands on its partition primary (locally
    /// or forwarded) and is replicated to the backups before the call returns.
    pub async fn publish(&self, queue: &str, event: IngestEvent) -> Result<MessageId> {
        let message_id = MessageId::new();
        let partition = self.partitioner.get_partition(&message_id.0);
        let owners = self.partitioner.get_owners(partition);

        let entry = MessageEntry {
            queue: queue.to_string(),
            event,
            status: MessageStatus::Pending,
            attempts: 0,
            enqueued_at: now_ms(),
            lease_expires: None,
        };

        if owners.is_empty() {
            tracing::warn!("No alive nodes, storing message locally");
            self.store_local(partition, message_id.clone(), entry);
            return Ok(message_id);
        }

        if owners[0] == self.membership.local_node.id {
            self.store_as_primary(partition, message_id.clone(), entry)
                .await?;
        } else {
            self.forward_publish(&owners[0], partition, message_id.clone(), entry)
                .await?;
        }

        Ok(message_id)
    }

    pub fn store_local(&self, partition: u32, message_id: MessageId, entry: MessageEntry) {
        let partition_map = self
            .local_messages
            .entry(partition)
            .or_insert_with(DashMap::new);

        // Insert-if-absent keeps replayed publishes idempotent
        if !partition_map.contains_key(&message_id) {
            partition_map.insert(message_id, entry);
        }
    }

    pub async fn store_as_primary(
        &self,
        partition: u32,
        message_id: MessageId,
        entry: MessageEntry,
    ) -> Result<()> {
        self.store_local(partition, message_id.clone(), entry.clone());

        for backup in self.partitioner.get_owners(partition).iter().skip(1) {
            self.replicate_to_backup(backup, partition, message_id.clone(), entry.clone())
                .await?;
        }
        Ok(())
    }

    async fn replicate_to_backup(
        &self,
        backup: &NodeId,
        partition: u32,
        message_id: MessageId,
        entry: MessageEntry,
    ) -> Result<()> {
        let node = self
            .membership
            .get_member(backup)
            .ok_or_else(|| anyhow::anyhow!("Backup node not found"))?;

        let payload = ReplicateMessageRequest {
            partition,
            message_id,
            entry,
        };
        let response = self
            .http
            .post_json_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_MQ_REPLICATE),
                &payload,
                OP_TIMEOUT,
                OP_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Message replication failed: {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn forward_publish(
        &self,
        target: &NodeId,
        partition: u32,
        message_id: MessageId,
        entry: MessageEntry,
    ) -> Result<()> {
        let node = self
            .membership
            .get_member(target)
            .ok_or_else(|| anyhow::anyhow!("Target node not found"))?;

        let payload = ForwardPublishRequest {
            partition,
            message_id,
            entry,
        };
        let response = self
            .http
            .post_json_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_MQ_FORWARD),
                &payload,
                OP_TIMEOUT,
                OP_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Publish forward failed: {}",
                response.status()
            ));
        }
        Ok(())
    }

    /// Deliverable messages of one queue in the partitions this node owns:
    /// `Pending`, plus `InFlight` whose lease lapsed (the claiming consumer
    /// died mid-processing).
    pub fn pending(&self, queue: &str) -> Vec<(MessageId, MessageEntry)> {
        let mut messages = Vec::new();

        for partition in self.partitioner.my_primary_partitions() {
            let Some(partition_map) = self.local_messages.get(&partition) else {
                continue;
            };
            for entry in partition_map.iter() {
                let message = entry.value();
                if message.queue != queue {
                    continue;
                }

                let deliverable = match message.status {
                    MessageStatus::Pending => true,
                    MessageStatus::InFlight => message
                        .lease_expires
                        .map(|lease| now_ms() > lease)
                        .unwrap_or(false),
                };
                if deliverable {
                    messages.push((entry.key().clone(), message.clone()));
                }
            }
        }

        messages
    }

    /// Atomic claim: flips a deliverable message to `InFlight` under a fresh
    /// lease. Exactly one of several racing consumers wins.
    pub fn try_claim(&self, message_id: &MessageId) -> Result<bool> {
        let partition = self.partitioner.get_partition(&message_id.0);

        if let Some(partition_map) = self.local_messages.get(&partition) {
            if let Some(mut entry) = partition_map.get_mut(message_id) {
                let deliverable = match entry.status {
                    MessageStatus::Pending => true,
                    MessageStatus::InFlight => entry
                        .lease_expires
                        .map(|lease| now_ms() > lease)
                        .unwrap_or(false),
                };
                if !deliverable {
                    return Ok(false);
                }

                entry.status = MessageStatus::InFlight;
                entry.attempts += 1;
                entry.lease_expires = Some(now_ms() + self.lease_ttl_ms);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Extends the lease of an in-flight message; called periodically while
    /// processing runs long.
    pub fn renew_lease(&self, message_id: &MessageId) -> Result<()> {
        let partition = self.partitioner.get_partition(&message_id.0);

        if let Some(partition_map) = self.local_messages.get(&partition) {
            if let Some(mut entry) = partition_map.get_mut(message_id) {
                if entry.status == MessageStatus::InFlight {
                    entry.lease_expires = Some(now_ms() + self.lease_ttl_ms);
                    return Ok(());
                }
                return Err(anyhow::anyhow!("Message is not in flight"));
            }
        }

        Err(anyhow::anyhow!("Message not found"))
    }

    /// Acknowledgment: the message is done and leaves the queue.
    pub fn ack(&self, message_id: &MessageId) -> Result<()> {
        let partition = self.partitioner.get_partition(&message_id.0);

        if let Some(partition_map) = self.local_messages.get(&partition) {
            if partition_map.remove(message_id).is_some() {
                return Ok(());
            }
        }
        Err(anyhow::anyhow!("Message not found"))
    }

    /// Returns a claimed message for redelivery after a failed attempt.
    pub fn requeue(&self, message_id: &MessageId) -> Result<()> {
        let partition = self.partitioner.get_partition(&message_id.0);

        if let Some(partition_map) = self.local_messages.get(&partition) {
            if let Some(mut entry) = partition_map.get_mut(message_id) {
                entry.status = MessageStatus::Pending;
                entry.lease_expires = None;
                return Ok(());
            }
        }
        Err(anyhow::anyhow!("Message not found"))
    }

    pub fn local_message_count(&self) -> usize {
        self.local_messages
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }
}
