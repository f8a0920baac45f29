//! Size-bounded cache of verified resources.
//!
//! Keyed by content id, bounded by total bytes (default 500 MB), evicting
//! least-recently-used entries. `get` counts as use: recency follows real
//! access order, not insertion order. Eviction scans the whole map for the
//! oldest entry; cardinality here is hundreds of entries, so the scan is
//! not worth an ordered structure yet.
//!
//! A resource larger than the whole cap is refused rather than cached;
//! verification of it still counts as a success, only serving from cache is
//! lost.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use common::now_secs;

/// A verified blob and the response metadata needed to re-serve it.
#[derive(Debug, Clone)]
pub struct VerifiedResource {
    pub content_id: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub headers: HashMap<String, String>,
    pub size: u64,
    pub verified_at: u64,
}

struct CacheSlot {
    resource: VerifiedResource,
    /// Monotonic access tick; larger = more recently used.
    last_accessed: u64,
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<String, CacheSlot>,
    total_bytes: u64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
}

/// LRU cache of verified resources, internally synchronized.
pub struct ResourceCache {
    max_bytes: u64,
    inner: Mutex<CacheInner>,
    tick: AtomicU64,
}

impl ResourceCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner::default()),
            tick: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert a verified resource, evicting LRU entries to make room.
    ///
    /// Returns false when the resource alone exceeds the cap and was not
    /// cached.
    pub fn set(&self, resource: VerifiedResource) -> bool {
        if resource.size > self.max_bytes {
            warn!(
                content_id = %resource.content_id,
                size = resource.size,
                cap = self.max_bytes,
                "Resource exceeds cache cap; serving without caching"
            );
            return false;
        }

        let tick = self.next_tick();
        let mut inner = self.inner.lock();

        // Replacing an entry frees its bytes first
        if let Some(old) = inner.slots.remove(&resource.content_id) {
            inner.total_bytes -= old.resource.size;
        }

        while inner.total_bytes + resource.size > self.max_bytes {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_accessed)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    if let Some(evicted) = inner.slots.remove(&id) {
                        inner.total_bytes -= evicted.resource.size;
                        debug!(content_id = %id, size = evicted.resource.size, "Evicted LRU cache entry");
                    }
                }
                None => break,
            }
        }

        inner.total_bytes += resource.size;
        inner.slots.insert(
            resource.content_id.clone(),
            CacheSlot {
                resource,
                last_accessed: tick,
            },
        );
        true
    }

    /// Fetch a resource, refreshing its recency.
    pub fn get(&self, content_id: &str) -> Option<VerifiedResource> {
        let tick = self.next_tick();
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(content_id)?;
        slot.last_accessed = tick;
        Some(slot.resource.clone())
    }

    /// Presence check; does not refresh recency.
    pub fn has(&self, content_id: &str) -> bool {
        self.inner.lock().slots.contains_key(content_id)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.total_bytes = 0;
    }

    /// Remove the given content ids, e.g. when a run is discarded or retried.
    pub fn clear_for(&self, content_ids: &[String]) {
        let mut inner = self.inner.lock();
        for id in content_ids {
            if let Some(slot) = inner.slots.remove(id) {
                inner.total_bytes -= slot.resource.size;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            count: inner.slots.len(),
            total_bytes: inner.total_bytes,
        }
    }
}

/// Build a `VerifiedResource` from fetched response parts.
pub fn resource_from_parts(
    content_id: &str,
    content_type: &str,
    bytes: Bytes,
    headers: HashMap<String, String>,
) -> VerifiedResource {
    VerifiedResource {
        content_id: content_id.to_string(),
        content_type: content_type.to_string(),
        size: bytes.len() as u64,
        bytes,
        headers,
        verified_at: now_secs(),
    }
}
