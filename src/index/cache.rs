use crate::grid::store::KeyValueStore;
use std::sync::Arc;

/// Book-id to content-hash lookup cache.
///
/// Lets the coordinator skip unchanged books without deserializing full
/// metadata. The backing store is constructor-injected (no ambient global
/// state) and lookups degrade to "absent" on substrate errors, which only
/// costs a redundant-but-idempotent re-index.
pub struct HashCache {
    store: Arc<dyn KeyValueStore<u32, String>>,
}

impl HashCache {
    pub fn new(store: Arc<dyn KeyValueStore<u32, String>>) -> Self {
        Self { store }
    }

    pub async fn get(&self, book_id: u32) -> Option<String> {
        match self.store.get(&book_id).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!("Hash cache lookup for {} failed: {}", book_id, e);
                None
            }
        }
    }

    pub async fn put(&self, book_id: u32, hash: String) {
        if let Err(e) = self.store.put(book_id, hash).await {
            tracing::warn!("Hash cache update for {} failed: {}", book_id, e);
        }
    }

    pub async fn invalidate(&self, book_id: u32) {
        if let Err(e) = self.store.remove(&book_id).await {
            tracing::warn!("Hash cache invalidation for {} failed: {}", book_id, e);
        }
    }

    pub async fn clear(&self) {
        for (book_id, _) in self.store.snapshot() {
            self.invalidate(book_id).await;
        }
    }
}
