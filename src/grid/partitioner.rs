use crate::membership::{service::MembershipService, types::NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub const NUM_PARTITIONS: u32 = 256;

/// Partition a key hashes into. Free-standing so receiving handlers can
/// recompute placement without a `PartitionManager` in scope.
pub fn partition_of(key: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as u32) % NUM_PARTITIONS
}

/// Maps keys to partitions and partitions to their owner nodes.
///
/// Ownership is recomputed from the current alive-member list on every call, so
/// placement follows the membership view without a separate rebalancing step.
pub struct PartitionManager {
    pub num_partitions: u32,
    replication_factor: usize,
    membership: Arc<MembershipService>,
}

impl PartitionManager {
    pub fn new(membership: Arc<MembershipService>, replication_factor: usize) -> Arc<Self> {
        Arc::new(Self {
            num_partitions: NUM_PARTITIONS,
            replication_factor: replication_factor.max(1),
            membership,
        })
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        partition_of(key)
    }

    /// Owner list for a partition: the primary first, then backups, wrapping
    /// around the sorted alive-node ids. Never returns more owners than there
    /// are alive nodes.
    pub fn get_owners(&self, partition: u32) -> Vec<NodeId> {
        let mut node_ids: Vec<NodeId> = self
            .membership
            .get_alive_members()
            .into_iter()
            .map(|node| node.id)
            .collect();

        if node_ids.is_empty() {
            return vec![];
        }
        node_ids.sort();

        let count = self.replication_factor.min(node_ids.len());
        let primary_idx = (partition as usize) % node_ids.len();

        (0..count)
            .map(|offset| node_ids[(primary_idx + offset) % node_ids.len()].clone())
            .collect()
    }

    pub fn is_local_primary(&self, partition: u32) -> bool {
        let owners = self.get_owners(partition);
        !owners.is_empty() && owners[0] == self.membership.local_node.id
    }

    pub fn my_primary_partitions(&self) -> Vec<u32> {
        (0..self.num_partitions)
            .filter(|&partition| self.is_local_primary(partition))
            .collect()
    }
}
