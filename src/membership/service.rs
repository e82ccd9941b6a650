use anyhow::Result;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

use super::types::{GossipMessage, Node, NodeId, NodeState};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_SWEEP_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Maintains the local view of the cluster and keeps it converging via gossip.
pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
}

impl MembershipService {
    /// Binds the gossip socket and announces this node to the seed list.
    ///
    /// `http_addr` is the address internode data traffic should use; it is
    /// disseminated with the node record so peers can route grid operations.
    pub async fn new(
        gossip_addr: SocketAddr,
        http_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(gossip_addr).await?;
        // The bind address may have been port 0; record what we actually got.
        let bound = socket.local_addr()?;

        let local_node = Node {
            id: NodeId::new(),
            gossip_addr: bound,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };

        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        if !seed_nodes.is_empty() {
            tracing::info!("Joining cluster via {} seed node(s)", seed_nodes.len());
            let msg = GossipMessage::Join {
                node: local_node.clone(),
            };
            let encoded = bincode::serialize(&msg)?;
            for seed in &seed_nodes {
                socket.send_to(&encoded, seed).await?;
                tracing::info!("Sent join request to {}", seed);
            }
        }

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: Arc::new(RwLock::new(1)),
        }))
    }

    /// Spawns the gossip, receive and failure-sweep loops.
    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service");

        let gossip = self.clone();
        tokio::spawn(async move {
            gossip.gossip_loop().await;
        });

        let receive = self.clone();
        tokio::spawn(async move {
            receive.receive_loop().await;
        });

        let sweep = self.clone();
        tokio::spawn(async move {
            sweep.failure_sweep_loop().await;
        });
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .count()
    }

    /// True when at least `needed` members are currently considered alive.
    /// Used by the lock service to decide whether consensus locking is viable.
    pub fn has_quorum(&self, needed: usize) -> bool {
        self.alive_count() >= needed
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let peers: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && entry.value().state == NodeState::Alive
                })
                .map(|entry| entry.value().clone())
                .collect();

            if peers.is_empty() {
                continue;
            }

            use rand::Rng;
            let target = &peers[rand::thread_rng().gen_range(0..peers.len())];

            let incarnation = *self.incarnation.read().await;
            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation,
            };

            match bincode::serialize(&msg) {
                Ok(encoded) => {
                    if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                        tracing::warn!("Failed to ping {:?}: {}", target.id, e);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize ping: {}", e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling gossip from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Undecodable gossip frame from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Join { node } => self.handle_join(node),
            GossipMessage::Ping { from, incarnation } => {
                self.handle_ping(from, incarnation, src).await?
            }
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => self.handle_ack(from, incarnation, members),
            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => self.handle_suspect(node_id, incarnation).await,
            GossipMessage::Alive {
                node_id,
                incarnation,
            } => self.handle_alive(node_id, incarnation),
        }

        Ok(())
    }

    pub(crate) fn handle_join(&self, mut node: Node) {
        tracing::info!("Node {:?} joining cluster from {}", node.id, node.gossip_addr);
        node.last_seen = Some(Instant::now());
        self.members.insert(node.id.clone(), node);
        tracing::info!("Cluster size now: {}", self.members.len());
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        from_incarnation: u64,
        src: SocketAddr,
    ) -> Result<()> {
        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
        } else {
            // A node we have never heard of pinged us; the full record arrives
            // with the next ack exchange, until then track it by source address.
            tracing::info!("Discovered new member via ping: {:?} at {}", from, src);
            self.members.insert(
                from.clone(),
                Node {
                    id: from.clone(),
                    gossip_addr: src,
                    http_addr: src,
                    state: NodeState::Alive,
                    incarnation: from_incarnation,
                    last_seen: Some(Instant::now()),
                },
            );
        }

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: *self.incarnation.read().await,
            members: all_members,
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, src).await?;
        Ok(())
    }

    fn handle_ack(&self, from: NodeId, from_incarnation: u64, members: Vec<Node>) {
        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
        }

        for member in members {
            self.merge_member(member);
        }
    }

    /// Folds a remote view of one node into the local table. Higher incarnation
    /// wins; an equal-incarnation Alive refutes a local Suspect.
    pub(crate) fn merge_member(&self, incoming: Node) {
        if incoming.id == self.local_node.id {
            return;
        }

        match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                if incoming.incarnation > existing.incarnation {
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.gossip_addr = incoming.gossip_addr;
                    existing.http_addr = incoming.http_addr;
                    existing.last_seen = Some(Instant::now());
                } else if incoming.incarnation == existing.incarnation
                    && incoming.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{:?} refuted suspicion", incoming.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::info!(
                    "Discovered new member: {:?} at {}",
                    incoming.id,
                    incoming.gossip_addr
                );
                let mut member = incoming;
                member.last_seen = Some(Instant::now());
                self.members.insert(member.id.clone(), member);
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            // Someone suspects us; bump our incarnation and refute.
            let my_incarnation = {
                let mut inc = self.incarnation.write().await;
                *inc += 1;
                *inc
            };
            tracing::info!("Refuting suspicion about the local node (inc={})", my_incarnation);

            if let Some(mut me) = self.members.get_mut(&node_id) {
                me.incarnation = my_incarnation;
                me.state = NodeState::Alive;
                me.last_seen = Some(Instant::now());
            }

            self.broadcast(GossipMessage::Alive {
                node_id,
                incarnation: my_incarnation,
            })
            .await;
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Node {:?} suspected", existing.id);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                }
            }
            None => tracing::debug!("Suspect message for unknown node {:?}", node_id),
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation
                    || (incarnation == existing.incarnation
                        && existing.state == NodeState::Suspect)
                {
                    tracing::info!("Node {:?} is Alive (inc={})", existing.id, incarnation);
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => tracing::debug!("Alive message for unknown node {:?}", node_id),
        }
    }

    async fn failure_sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_SWEEP_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let mut suspicions = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();
                if member.id == self.local_node.id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive if elapsed > SUSPECT_TIMEOUT => {
                        tracing::warn!(
                            "Node {:?} suspected (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = NodeState::Suspect;
                        suspicions.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    NodeState::Suspect if elapsed > DEAD_TIMEOUT => {
                        tracing::warn!(
                            "Node {:?} declared DEAD (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = NodeState::Dead;
                    }
                    _ => {}
                }
            }

            if !suspicions.is_empty() {
                tracing::info!("Cluster: {} alive nodes", self.alive_count());
            }
            for msg in suspicions {
                self.broadcast(msg).await;
            }
        }
    }

    async fn broadcast(&self, msg: GossipMessage) {
        let Ok(encoded) = bincode::serialize(&msg) else {
            tracing::error!("Failed to serialize broadcast message");
            return;
        };

        for entry in self.members.iter() {
            let member = entry.value();
            if member.id == self.local_node.id || member.state != NodeState::Alive {
                continue;
            }
            if let Err(e) = self.socket.send_to(&encoded, member.gossip_addr).await {
                tracing::warn!("Failed to broadcast to {:?}: {}", member.id, e);
            }
        }
    }
}
