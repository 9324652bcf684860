//! Concurrent registry of in-flight texture requests.
//!
//! The registry is the synchronization hub of the pipeline: ingress
//! handlers, the scheduler, workers and the refresh timer all rendezvous
//! here. It is a sharded map, so concurrent readers never block each other
//! and writes to distinct keys do not serialize. Mutation *within* a
//! request (state word, transfer buffer, callback list) is guarded by the
//! request's own locks, never by the map.
//!
//! # Invariants
//!
//! - At most one request per asset id exists at any instant;
//!   [`RequestRegistry::get_or_insert`] is the only insertion path and is
//!   atomic, so concurrent submissions coalesce instead of duplicating.
//! - [`RequestRegistry::try_remove`] is atomic; exactly one caller
//!   observes the removed value and becomes responsible for finalizing it.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use crate::texture::request::TextureRequest;

/// Map of asset id to in-flight request.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    map: DashMap<Uuid, Arc<TextureRequest>>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a request.
    pub fn get(&self, asset_id: Uuid) -> Option<Arc<TextureRequest>> {
        self.map.get(&asset_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Fetch the request for `asset_id`, or insert the one `factory`
    /// builds. Returns the request and whether it was inserted.
    ///
    /// Atomic: two racing callers get the same request, exactly one sees
    /// `inserted == true`.
    pub fn get_or_insert(
        &self,
        asset_id: Uuid,
        factory: impl FnOnce() -> TextureRequest,
    ) -> (Arc<TextureRequest>, bool) {
        match self.map.entry(asset_id) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let request = Arc::new(factory());
                entry.insert(Arc::clone(&request));
                (request, true)
            },
        }
    }

    /// Remove and return the request for `asset_id`, if present.
    ///
    /// Atomic: of any number of racing removers, exactly one gets the
    /// value. The winner owns finalization; everyone else backs off.
    pub fn try_remove(&self, asset_id: Uuid) -> Option<Arc<TextureRequest>> {
        self.map.remove(&asset_id).map(|(_, request)| request)
    }

    /// Clone out every in-flight request. O(n); used by the refresh scan
    /// and the scheduler so neither holds map locks while acting.
    pub fn snapshot(&self) -> Vec<Arc<TextureRequest>> {
        self.map.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Run `f` over the request for `asset_id` while holding at most that
    /// entry's shard lock.
    pub fn with_value<R>(
        &self,
        asset_id: Uuid,
        f: impl FnOnce(&Arc<TextureRequest>) -> R,
    ) -> Option<R> {
        self.map.get(&asset_id).map(|entry| f(entry.value()))
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Remove and return everything; used by shutdown.
    pub fn drain(&self) -> Vec<Arc<TextureRequest>> {
        let ids: Vec<Uuid> = self.map.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.try_remove(id)).collect()
    }
}
