//! Trusted and routing gateway pools.
//!
//! The gateway registry (a ranked list of `{origin, stake}`) lives in the
//! injected KV store and is refreshed by the host. Pools are derived views:
//! the trusted pool is the top of the ranking and is used for consensus and
//! digest acquisition; the routing pool is the full list and is used only
//! for content delivery throughput.
//!
//! Deriving the ranking on every request would hammer the KV store, so a
//! snapshot is cached with a short TTL (same shape as the gateway's
//! rebalance status cache in the storage subnet this grew out of).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::REGISTRY_KEY;
use crate::error::Result;
use crate::kv::KvStore;

/// One registry entry: an origin URL and the stake backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEntry {
    pub origin: String,
    pub stake: u64,
}

struct PoolSnapshot {
    /// Origins sorted by stake, highest first.
    ranked: Vec<String>,
    taken_at: Instant,
}

/// Cached, ranked view over the KV-backed gateway registry.
pub struct GatewayPools {
    kv: Arc<dyn KvStore>,
    snapshot: RwLock<Option<PoolSnapshot>>,
    snapshot_ttl: Duration,
    trusted_size: usize,
}

impl GatewayPools {
    pub fn new(kv: Arc<dyn KvStore>, snapshot_ttl: Duration, trusted_size: usize) -> Self {
        Self {
            kv,
            snapshot: RwLock::new(None),
            snapshot_ttl,
            trusted_size,
        }
    }

    /// Persist a registry, replacing whatever the KV store held.
    ///
    /// Invalidates the cached snapshot so the next read sees the new list.
    pub async fn set_registry(&self, entries: &[GatewayEntry]) -> Result<()> {
        let mut kv_entries = HashMap::new();
        kv_entries.insert(REGISTRY_KEY.to_string(), serde_json::to_value(entries).unwrap_or_default());
        self.kv.set(kv_entries).await?;
        *self.snapshot.write() = None;
        Ok(())
    }

    /// Ranked origin list, rebuilding the snapshot when the TTL lapsed.
    async fn ranked(&self) -> Result<Vec<String>> {
        {
            let guard = self.snapshot.read();
            if let Some(snap) = guard.as_ref()
                && snap.taken_at.elapsed() < self.snapshot_ttl
            {
                return Ok(snap.ranked.clone());
            }
        }

        let keys = vec![REGISTRY_KEY.to_string()];
        let stored = self.kv.get(&keys).await?;
        let mut entries: Vec<GatewayEntry> = stored
            .get(REGISTRY_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        if entries.is_empty() {
            warn!("Gateway registry is empty; resolver will have no candidates");
        }

        entries.sort_by(|a, b| b.stake.cmp(&a.stake).then(a.origin.cmp(&b.origin)));
        let ranked: Vec<String> = entries.into_iter().map(|e| e.origin).collect();

        debug!(gateways = ranked.len(), "Rebuilt gateway pool snapshot");
        *self.snapshot.write() = Some(PoolSnapshot {
            ranked: ranked.clone(),
            taken_at: Instant::now(),
        });
        Ok(ranked)
    }

    /// Top-of-ranking origins used for consensus resolution and trusted
    /// digest acquisition.
    pub async fn trusted(&self) -> Result<Vec<String>> {
        let ranked = self.ranked().await?;
        Ok(ranked.into_iter().take(self.trusted_size).collect())
    }

    /// Full ranked origin list for content routing. Callers shuffle for
    /// load distribution; rank order is only a quality hint here.
    pub async fn routing(&self) -> Result<Vec<String>> {
        self.ranked().await
    }

    /// Drop the cached snapshot (tests and registry refreshes).
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }
}
