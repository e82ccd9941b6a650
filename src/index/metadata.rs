use crate::grid::lock::{ConsensusLock, LockToken};
use crate::grid::store::KeyValueStore;
use crate::index::types::DocumentMetadata;

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

const LOCK_NAME_PREFIX: &str = "doc-metadata-lock-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    Consensus,
    Local,
}

/// Per-book metadata plus the lock factory that serializes writers of one book.
///
/// The lock strategy is chosen once per store instance: the consensus lock when
/// the cluster has a quorum, the per-book local mutex otherwise. If the
/// consensus primitive ever errors the store degrades to local locking for its
/// remaining lifetime, logged and exposed via [`lock_degraded`] rather than
/// inferred implicitly by callers.
///
/// [`lock_degraded`]: DocumentMetadataStore::lock_degraded
pub struct DocumentMetadataStore {
    map: Arc<dyn KeyValueStore<u32, DocumentMetadata>>,
    consensus: Option<Arc<dyn ConsensusLock>>,
    local_locks: Arc<DashMap<u32, Arc<Mutex<()>>>>,
    use_consensus: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
}

impl DocumentMetadataStore {
    pub fn new(
        map: Arc<dyn KeyValueStore<u32, DocumentMetadata>>,
        consensus: Option<Arc<dyn ConsensusLock>>,
    ) -> Self {
        let use_consensus = match &consensus {
            Some(lock) if lock.quorum_available() => true,
            Some(_) => {
                tracing::info!(
                    "Consensus lock lacks a quorum, metadata store starts with local locking"
                );
                false
            }
            None => false,
        };

        Self {
            map,
            consensus,
            local_locks: Arc::new(DashMap::new()),
            use_consensus: Arc::new(AtomicBool::new(use_consensus)),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn get(&self, book_id: u32) -> Option<DocumentMetadata> {
        match self.map.get(&book_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Metadata lookup for {} failed: {}", book_id, e);
                None
            }
        }
    }

    /// Last-writer-wins; callers hold the book's lock while writing.
    pub async fn put(&self, book_id: u32, metadata: DocumentMetadata) -> Result<()> {
        self.map.put(book_id, metadata).await
    }

    /// Snapshot listing. `offset < 0` clamps to 0, `limit <= 0` defaults to
    /// 100; no ordering guarantee.
    pub fn list(&self, offset: i64, limit: i64) -> Vec<DocumentMetadata> {
        let safe_offset = offset.max(0) as usize;
        let safe_limit = if limit <= 0 { 100 } else { limit as usize };

        self.map
            .snapshot()
            .into_iter()
            .map(|(_, metadata)| metadata)
            .skip(safe_offset)
            .take(safe_limit)
            .collect()
    }

    pub fn lock_for(&self, book_id: u32) -> MetadataLock {
        MetadataLock {
            name: format!("{}{}", LOCK_NAME_PREFIX, book_id),
            book_id,
            consensus: self.consensus.clone(),
            use_consensus: self.use_consensus.clone(),
            degraded: self.degraded.clone(),
            local_locks: self.local_locks.clone(),
        }
    }

    pub fn lock_strategy(&self) -> LockStrategy {
        if self.use_consensus.load(Ordering::SeqCst) {
            LockStrategy::Consensus
        } else {
            LockStrategy::Local
        }
    }

    /// True once the consensus primitive has failed and the store switched to
    /// local locking.
    pub fn lock_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

/// Handle for one book's lock under the store's current strategy.
pub struct MetadataLock {
    name: String,
    book_id: u32,
    consensus: Option<Arc<dyn ConsensusLock>>,
    use_consensus: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
    local_locks: Arc<DashMap<u32, Arc<Mutex<()>>>>,
}

impl MetadataLock {
    /// Acquires the lock, degrading to the local mutex if the consensus
    /// primitive errors. Acquisition itself never fails; degradation is
    /// surfaced through the store flag and a warning.
    pub async fn lock(&self) -> MetadataGuard {
        if self.use_consensus.load(Ordering::SeqCst) {
            if let Some(service) = &self.consensus {
                match service.acquire(&self.name).await {
                    Ok(token) => {
                        return MetadataGuard::Consensus {
                            service: service.clone(),
                            name: self.name.clone(),
                            token,
                        };
                    }
                    Err(e) => {
                        self.use_consensus.store(false, Ordering::SeqCst);
                        if !self.degraded.swap(true, Ordering::SeqCst) {
                            tracing::warn!(
                                "Consensus lock unavailable, degrading to node-local locking: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let slot = self
            .local_locks
            .entry(self.book_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        MetadataGuard::Local(slot.lock_owned().await)
    }
}

/// A held lock. Must be released on every path, including failures.
pub enum MetadataGuard {
    Consensus {
        service: Arc<dyn ConsensusLock>,
        name: String,
        token: LockToken,
    },
    Local(OwnedMutexGuard<()>),
}

impl MetadataGuard {
    pub async fn unlock(self) {
        match self {
            MetadataGuard::Consensus {
                service,
                name,
                token,
            } => {
                if let Err(e) = service.release(&name, &token).await {
                    tracing::warn!("Failed to release consensus lock {}: {}", name, e);
                }
            }
            MetadataGuard::Local(guard) => drop(guard),
        }
    }
}
