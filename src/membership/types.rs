use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

/// Unique identifier of a cluster member, stable for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// A single member of the cluster.
///
/// `gossip_addr` is the UDP endpoint of the membership protocol, `http_addr` the
/// TCP endpoint all internode data traffic (grid, queue, replicas) goes to.
/// `incarnation` orders conflicting updates about the same node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// The UDP wire protocol between members.
///
/// - `Join`: sent by a starting node to its seeds.
/// - `Ping`/`Ack`: liveness probe; the ack piggybacks the full member view.
/// - `Suspect`/`Alive`: health state dissemination and refutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Join {
        node: Node,
    },

    Ping {
        from: NodeId,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },
}
