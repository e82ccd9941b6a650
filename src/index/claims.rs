use crate::grid::store::{LocalSet, MemberSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// At-most-one-claim semantics for book ids.
///
/// Backed by the distributed set; when the substrate is unreachable the store
/// fails open to a process-local set, so availability is preserved at the cost
/// of cluster-wide exclusivity. The degradation is logged once and exposed via
/// [`ClaimStore::degraded`], never silent.
pub struct ClaimStore {
    shared: Option<Arc<dyn MemberSet<u32>>>,
    local: LocalSet<u32>,
    degraded: AtomicBool,
}

impl ClaimStore {
    pub fn new(shared: Arc<dyn MemberSet<u32>>) -> Self {
        Self {
            shared: Some(shared),
            local: LocalSet::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// A store with no distributed substrate at all; claims are node-local.
    pub fn local_only() -> Self {
        Self {
            shared: None,
            local: LocalSet::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// True iff this call established the claim.
    pub async fn try_claim(&self, book_id: u32) -> bool {
        if let Some(shared) = &self.shared {
            match shared.add_if_absent(book_id).await {
                Ok(inserted) => return inserted,
                Err(e) => {
                    if !self.degraded.swap(true, Ordering::SeqCst) {
                        tracing::warn!(
                            "Claim substrate unreachable, falling back to node-local claims: {}",
                            e
                        );
                    }
                }
            }
        }

        self.local.add_if_absent(book_id).await.unwrap_or(false)
    }

    /// Unconditional release; absent ids are a no-op. Clears both the shared
    /// and the local set so a claim taken during degradation cannot linger.
    pub async fn release(&self, book_id: u32) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.remove(&book_id).await {
                tracing::warn!("Failed to release claim {} on the substrate: {}", book_id, e);
            }
        }
        let _ = self.local.remove(&book_id).await;
    }

    /// Whether this store has fallen back to node-local claims.
    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}
