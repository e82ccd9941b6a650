//! Substrate capability traits and their in-process implementations.
//!
//! The coordination layer (claims, metadata, hash cache) talks to these traits
//! only. `ReplicatedMap`/`ReplicatedSet` satisfy them across the cluster; the
//! `Local*` types satisfy them within one process and double as the unit-test
//! substrate.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::hash::Hash;

/// A distributed map: get / put (last-writer-wins) / remove, plus a snapshot of
/// the locally held entries for paginated listings and bulk invalidation.
#[async_trait]
pub trait KeyValueStore<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn get(&self, key: &K) -> Result<Option<V>>;
    async fn put(&self, key: K, value: V) -> Result<()>;
    async fn remove(&self, key: &K) -> Result<()>;

    /// Snapshot of currently held entries. No ordering guarantee.
    fn snapshot(&self) -> Vec<(K, V)>;
}

/// A distributed set with add-if-absent semantics.
///
/// `add_if_absent` returns true iff this call inserted the value; that is the
/// primitive the claim protocol is built on.
#[async_trait]
pub trait MemberSet<K>: Send + Sync
where
    K: Send + Sync,
{
    async fn add_if_absent(&self, value: K) -> Result<bool>;
    async fn remove(&self, value: &K) -> Result<()>;
}

/// In-process `KeyValueStore`.
pub struct LocalKv<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> LocalKv<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V> Default for LocalKv<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> KeyValueStore<K, V> for LocalKv<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: K, value: V) -> Result<()> {
        self.entries.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// In-process `MemberSet`.
pub struct LocalSet<K> {
    entries: DashMap<K, ()>,
}

impl<K: Eq + Hash> LocalSet<K> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Eq + Hash> Default for LocalSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K> MemberSet<K> for LocalSet<K>
where
    K: Eq + Hash + Send + Sync + 'static,
{
    async fn add_if_absent(&self, value: K) -> Result<bool> {
        Ok(self.entries.insert(value, ()).is_none())
    }

    async fn remove(&self, value: &K) -> Result<()> {
        self.entries.remove(value);
        Ok(())
    }
}
