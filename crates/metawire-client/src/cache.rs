//! Asset cache interface.
//!
//! The pipeline only needs three operations, all synchronous and expected
//! to be fast: membership, read, and write. The on-disk layout is the
//! embedding application's concern; this crate ships [`MemoryCache`] for
//! tests and simple consumers.

use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

/// Storage for completed assets.
///
/// Implementations synchronize internally. The pipeline guarantees a
/// single writer per asset id (only the completion path writes) but reads
/// may come from any thread.
pub trait AssetCache: Send + Sync {
    /// True when the asset is present.
    fn has(&self, asset_id: Uuid) -> bool;

    /// Fetch an asset's bytes.
    fn get(&self, asset_id: Uuid) -> Option<Bytes>;

    /// Store an asset. Errors are reported as a message; the pipeline logs
    /// them without failing the request.
    fn put(&self, asset_id: Uuid, data: Bytes) -> Result<(), String>;
}

/// In-memory cache over a sharded map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<Uuid, Bytes>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached assets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AssetCache for MemoryCache {
    fn has(&self, asset_id: Uuid) -> bool {
        self.entries.contains_key(&asset_id)
    }

    fn get(&self, asset_id: Uuid) -> Option<Bytes> {
        self.entries.get(&asset_id).map(|entry| entry.clone())
    }

    fn put(&self, asset_id: Uuid, data: Bytes) -> Result<(), String> {
        self.entries.insert(asset_id, data);
        Ok(())
    }
}
