//! Gateway health tracking.
//!
//! Health is a time-boxed blacklist keyed by hostname, not full URL, so
//! path and port variations of the same origin share one entry. An entry is
//! authoritative only while `now < expires_at`; expired entries are treated
//! as absent and the origin is presumed healthy again.

use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fetch::hostname_of;
use common::now_secs;

/// One blacklist entry. Created on failure, deleted on expiry or clear.
#[derive(Debug, Clone)]
pub struct HealthEntry {
    pub hostname: String,
    pub failed_at: u64,
    pub expires_at: u64,
    pub error: Option<String>,
}

/// Time-boxed origin blacklist shared by every component that picks origins.
#[derive(Default)]
pub struct GatewayHealth {
    entries: DashMap<String, HealthEntry>,
}

impl GatewayHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `origin` is currently presumed usable.
    ///
    /// Expired entries are removed on the way out.
    pub fn is_healthy(&self, origin: &str) -> bool {
        let host = hostname_of(origin);
        let now = now_secs();
        // Read fully before removing: the map guard must not be alive
        // when the same shard is mutated.
        let expired = match self.entries.get(&host) {
            Some(entry) => {
                if now < entry.expires_at {
                    return false;
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(&host);
        }
        true
    }

    /// Blacklist `origin` for `ttl`, recording the failure reason.
    pub fn mark_unhealthy(&self, origin: &str, ttl: Duration, reason: &str) {
        let host = hostname_of(origin);
        let now = now_secs();
        warn!(host = %host, ttl_secs = ttl.as_secs(), reason = %reason, "Marking gateway unhealthy");
        self.entries.insert(
            host.clone(),
            HealthEntry {
                hostname: host,
                failed_at: now,
                expires_at: now + ttl.as_secs(),
                error: Some(reason.to_string()),
            },
        );
    }

    /// Keep only the origins currently presumed healthy, preserving order.
    pub fn filter_healthy(&self, origins: &[String]) -> Vec<String> {
        origins
            .iter()
            .filter(|o| self.is_healthy(o))
            .cloned()
            .collect()
    }

    /// Drop every entry. Used when filtering would otherwise empty a
    /// candidate list and lock the engine out of the network.
    pub fn clear(&self) {
        if !self.entries.is_empty() {
            debug!(entries = self.entries.len(), "Clearing gateway blacklist");
        }
        self.entries.clear();
    }

    /// Drop expired entries. Called from the background sweep.
    pub fn sweep(&self) {
        let now = now_secs();
        // Guard: skip on clock skew rather than flushing everything
        if now == 0 {
            return;
        }
        self.entries.retain(|_, e| now < e.expires_at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of an origin's entry, if one exists (expired or not).
    pub fn entry(&self, origin: &str) -> Option<HealthEntry> {
        self.entries.get(&hostname_of(origin)).map(|e| e.clone())
    }
}
