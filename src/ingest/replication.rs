use std::time::Duration;
use thiserror::Error;

/// Quorum shortfall: fewer durable copies than the replication factor demands.
/// Carried back to the caller so the ingestion is reported failed with the
/// exact counts, never silently treated as success.
#[derive(Debug, Error)]
#[error("replication quorum not reached: {replicated_total}/{needed_total} copies")]
pub struct ReplicationError {
    pub replicated_total: usize,
    pub needed_total: usize,
    pub attempted_peers: Vec<String>,
}

/// Pushes a freshly ingested document to peer nodes until a quorum of copies
/// exists.
///
/// The local durable write counts as the first copy; `replication_factor - 1`
/// positive peer acknowledgments within the push timeout complete the quorum.
pub struct ReplicationCoordinator {
    http_client: reqwest::Client,
    node_id: String,
    push_timeout: Duration,
}

impl ReplicationCoordinator {
    pub fn new(node_id: String) -> Self {
        Self::with_timeout(node_id, Duration::from_secs(10))
    }

    pub fn with_timeout(node_id: String, push_timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            node_id,
            push_timeout,
        }
    }

    /// Iterates the configured peer list until `replication_factor - 1` remote
    /// copies are acknowledged or the list is exhausted. Returns the replica
    /// node list (the local node first) on success.
    pub async fn replicate(
        &self,
        book_id: u32,
        date: &str,
        hour: &str,
        document_json: &str,
        replication_factor: usize,
        peers: &[String],
    ) -> Result<Vec<String>, ReplicationError> {
        let needed_remote = replication_factor.saturating_sub(1);
        let mut replicas = vec![self.node_id.clone()];

        if needed_remote == 0 {
            return Ok(replicas);
        }

        let mut successes = 0usize;
        for peer in peers {
            if successes >= needed_remote {
                break;
            }

            let url = format!(
                "{}/internal/replica/{}/{}/{}",
                peer.trim_end_matches('/'),
                date,
                hour,
                book_id
            );

            if self.push(&url, document_json).await {
                successes += 1;
                replicas.push(peer.clone());
            } else {
                tracing::warn!("Replica push for book {} to {} failed", book_id, peer);
            }
        }

        if successes < needed_remote {
            return Err(ReplicationError {
                replicated_total: 1 + successes,
                needed_total: replication_factor,
                attempted_peers: peers.to_vec(),
            });
        }

        Ok(replicas)
    }

    async fn push(&self, url: &str, body: &str) -> bool {
        match self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .timeout(self.push_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
