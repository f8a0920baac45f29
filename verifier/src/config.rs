//! Configuration constants and types for the verification engine.
//!
//! Defaults live here as documented constants; `VerifierConfig` carries the
//! tunable subset so embedders can override without recompiling.
//!
//! # Constant Categories
//!
//! - **Timeouts**: probe, per-resource fetch, caller wait
//! - **Concurrency**: fan-out width and its clamp
//! - **Health**: blacklist TTL
//! - **Caching**: verified-resource cap, pool snapshot TTL, resolution memo
//! - **Retention**: finished-run sweep

use std::time::Duration;

/// How long a failing origin stays blacklisted (seconds).
pub const HEALTH_TTL_SECS: u64 = 300;

/// Timeout for health probes, resolution probes, and manifest fetches.
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Per-attempt timeout for a single resource fetch during fan-out.
pub const RESOURCE_TIMEOUT_SECS: u64 = 5;

/// Default resource fan-out width.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Fan-out width clamp bounds.
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 20;

/// Distinct origins tried per resource before recording failure.
pub const ORIGIN_ATTEMPTS: usize = 3;

/// Verified-resource cache cap in bytes (500 MB).
pub const MAX_CACHE_BYTES: u64 = 500 * 1024 * 1024;

/// TTL for a cached candidate-pool snapshot (seconds).
pub const POOL_SNAPSHOT_TTL_SECS: u64 = 60;

/// Gateways in the trusted pool (top of the ranked registry).
pub const TRUSTED_POOL_SIZE: usize = 5;

/// Resolution memo: entry TTL (seconds) and capacity.
pub const RESOLUTION_MEMO_TTL_SECS: u64 = 300;
pub const RESOLUTION_MEMO_CAPACITY: usize = 1000;

/// Default bound for callers waiting on a run they did not start.
pub const WAIT_TIMEOUT_SECS: u64 = 60;

/// Finished runs older than this are swept from the run table (seconds).
pub const RUN_RETENTION_SECS: u64 = 30 * 60;

/// Interval between background sweeps (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// KV key under which the gateway registry is persisted.
pub const REGISTRY_KEY: &str = "gateway-registry";

/// Response header carrying the resolved content id for a name probe.
pub const RESOLVED_ID_HEADER: &str = "x-arns-resolved-id";

/// Response header carrying a trusted digest on raw-content responses.
pub const DIGEST_HEADER: &str = "x-ar-io-digest";

/// Probe path used to check that an origin is alive.
pub const PROBE_PATH: &str = "/ar-io/info";

/// Tunable engine configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub health_ttl: Duration,
    pub probe_timeout: Duration,
    pub resource_timeout: Duration,
    /// Fan-out width; clamped to [MIN_CONCURRENCY, MAX_CONCURRENCY] at use.
    pub concurrency: usize,
    pub origin_attempts: usize,
    pub max_cache_bytes: u64,
    pub pool_snapshot_ttl: Duration,
    pub trusted_pool_size: usize,
    pub resolution_memo_ttl: Duration,
    pub wait_timeout: Duration,
    pub run_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            health_ttl: Duration::from_secs(HEALTH_TTL_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            resource_timeout: Duration::from_secs(RESOURCE_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            origin_attempts: ORIGIN_ATTEMPTS,
            max_cache_bytes: MAX_CACHE_BYTES,
            pool_snapshot_ttl: Duration::from_secs(POOL_SNAPSHOT_TTL_SECS),
            trusted_pool_size: TRUSTED_POOL_SIZE,
            resolution_memo_ttl: Duration::from_secs(RESOLUTION_MEMO_TTL_SECS),
            wait_timeout: Duration::from_secs(WAIT_TIMEOUT_SECS),
            run_retention: Duration::from_secs(RUN_RETENTION_SECS),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
        }
    }
}

impl VerifierConfig {
    /// Fan-out width with the documented clamp applied.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }
}

/// URL of the raw-content endpoint for `content_id` on `origin`.
pub fn raw_url(origin: &str, content_id: &str) -> String {
    format!("{}/raw/{}", origin.trim_end_matches('/'), content_id)
}
