//! Engine wiring and end-to-end orchestration.
//!
//! `Engine` owns explicit instances of every component (health tracker,
//! pools, cache, run table) and the injected seams (fetch capability, KV
//! store, event sink, verification strategy). There is no ambient global
//! state; embedders construct one engine per process and pass it around.
//!
//! `verify` drives one identifier end to end:
//! resolve → select routing gateway → fetch+verify manifest → bounded
//! fan-out over referenced resources → terminal status on the run.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheStats, ResourceCache, VerifiedResource};
use crate::config::VerifierConfig;
use crate::content::fetch_and_verify;
use crate::error::{Result, VerifyError};
use crate::fetch::FetchClient;
use crate::health::GatewayHealth;
use crate::kv::KvStore;
use crate::pool::{GatewayEntry, GatewayPools};
use crate::resolver::Resolver;
use crate::selector::{ExhaustPolicy, select_working};
use crate::state::{FALLBACK_PATH, StateMachine, VerificationRun};
use crate::strategy::{DigestStrategy, VerificationStrategy};
use crate::workers::verify_all;
use common::{EventSink, PathManifest};

/// Aggregate statistics snapshot for status surfaces.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub cache: CacheStats,
    pub tracked_runs: usize,
    pub blacklisted_gateways: usize,
}

/// The verification engine. One per process; cheap to share via `Arc`.
pub struct Engine {
    config: VerifierConfig,
    fetch: Arc<dyn FetchClient>,
    strategy: Arc<dyn VerificationStrategy>,
    pools: Arc<GatewayPools>,
    health: Arc<GatewayHealth>,
    cache: Arc<ResourceCache>,
    state: Arc<StateMachine>,
    resolver: Resolver,
}

impl Engine {
    /// Construct with the default digest-comparison strategy.
    pub fn new(
        config: VerifierConfig,
        fetch: Arc<dyn FetchClient>,
        kv: Arc<dyn KvStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let health = Arc::new(GatewayHealth::new());
        let pools = Arc::new(GatewayPools::new(
            kv,
            config.pool_snapshot_ttl,
            config.trusted_pool_size,
        ));
        let strategy: Arc<dyn VerificationStrategy> = Arc::new(DigestStrategy::new(
            fetch.clone(),
            pools.clone(),
            health.clone(),
            config.probe_timeout,
        ));
        Self::with_strategy(config, fetch, sink, pools, health, strategy)
    }

    /// Construct with an injected verification strategy.
    pub fn with_strategy(
        config: VerifierConfig,
        fetch: Arc<dyn FetchClient>,
        sink: Arc<dyn EventSink>,
        pools: Arc<GatewayPools>,
        health: Arc<GatewayHealth>,
        strategy: Arc<dyn VerificationStrategy>,
    ) -> Self {
        let cache = Arc::new(ResourceCache::new(config.max_cache_bytes));
        let state = Arc::new(StateMachine::new(sink));
        let resolver = Resolver::new(fetch.clone(), health.clone(), pools.clone(), &config);
        Engine {
            config,
            fetch,
            strategy,
            pools,
            health,
            cache,
            state,
            resolver,
        }
    }

    /// Replace the persisted gateway registry.
    pub async fn set_gateway_registry(&self, entries: &[GatewayEntry]) -> Result<()> {
        self.pools.set_registry(entries).await
    }

    /// Verify `identifier` end to end, returning the terminal run state.
    ///
    /// Starting a verification supersedes any in-flight run for the same
    /// identifier; the superseded run's callbacks become no-ops.
    pub async fn verify(&self, identifier: &str) -> Result<VerificationRun> {
        let run_id = self.state.start(identifier);
        match self.verify_inner(identifier, run_id).await {
            Ok(()) => self
                .state
                .get_state(identifier)
                .ok_or(VerifyError::VerificationTimeout {
                    identifier: identifier.to_string(),
                }),
            Err(e) => {
                self.state.fail(identifier, run_id, &e);
                Err(e)
            }
        }
    }

    async fn verify_inner(&self, identifier: &str, run_id: u64) -> Result<()> {
        let resolved = self.resolver.resolve(identifier).await?;
        self.state.set_resolved(
            identifier,
            run_id,
            &resolved.content_id,
            resolved.routing_origin.as_deref(),
        );

        // Routing candidates: shuffled for load spread, resolution hint first.
        let mut routing = self.pools.routing().await?;
        routing.shuffle(&mut rand::rng());
        if let Some(hint) = &resolved.routing_origin {
            routing.retain(|o| o != hint);
            routing.insert(0, hint.clone());
        }
        let origin = select_working(
            &self.fetch,
            &self.health,
            &routing,
            self.config.probe_timeout,
            self.config.health_ttl,
            ExhaustPolicy::Fail,
        )
        .await?;

        let content = fetch_and_verify(
            &self.fetch,
            &self.strategy,
            &self.cache,
            &origin,
            &resolved.content_id,
            self.config.probe_timeout,
        )
        .await?;

        match content.manifest {
            Some(manifest) => {
                let manifest = Arc::new(manifest);
                self.state
                    .set_manifest_loaded(identifier, run_id, manifest.clone(), false);
                verify_all(
                    self.fetch.clone(),
                    self.strategy.clone(),
                    self.cache.clone(),
                    self.health.clone(),
                    self.state.clone(),
                    &self.config,
                    identifier,
                    run_id,
                    &manifest,
                    &origin,
                    &routing,
                )
                .await;
            }
            None => {
                // Single file: synthesize a one-entry manifest whose index
                // points at the content itself. The bytes are already
                // cached and verified, so the run settles immediately.
                let manifest = Arc::new(PathManifest::single_file(&resolved.content_id));
                self.state
                    .set_manifest_loaded(identifier, run_id, manifest, true);
                self.state.record_verified(
                    identifier,
                    run_id,
                    &resolved.content_id,
                    &resolved.content_id,
                );
            }
        }
        Ok(())
    }

    /// Discard the identifier's cached resources and verify it afresh.
    pub async fn retry(&self, identifier: &str) -> Result<VerificationRun> {
        if let Some(run) = self.state.get_state(identifier) {
            let mut ids: Vec<String> = run.path_to_content_id.values().cloned().collect();
            if let Some(cid) = run.content_id {
                ids.push(cid);
            }
            info!(identifier = %identifier, resources = ids.len(), "Retrying; clearing cached resources");
            self.cache.clear_for(&ids);
        }
        self.verify(identifier).await
    }

    /// Resolve a logical path through a finished run to verified bytes.
    ///
    /// `""` and `"/"` route to the manifest index; paths absent from the
    /// manifest route to its fallback entry when one exists.
    pub fn resource_for_path(&self, identifier: &str, path: &str) -> Result<VerifiedResource> {
        let not_found = || VerifyError::ResourceNotFound {
            identifier: identifier.to_string(),
            path: path.to_string(),
        };

        let run = self.state.get_state(identifier).ok_or_else(not_found)?;
        if !self.state.is_complete(identifier) {
            return Err(not_found());
        }

        let normalized = path.trim_start_matches('/');
        let lookup: &str = if normalized.is_empty() {
            run.index_path.as_deref().ok_or_else(not_found)?
        } else {
            normalized
        };

        let content_id = run
            .path_to_content_id
            .get(lookup)
            .or_else(|| run.path_to_content_id.get(FALLBACK_PATH))
            .ok_or_else(not_found)?;

        debug!(identifier = %identifier, path = %lookup, content_id = %content_id, "Serving verified resource");
        self.cache.get(content_id).ok_or_else(not_found)
    }

    /// Snapshot of the current run for `identifier`.
    pub fn run_state(&self, identifier: &str) -> Option<VerificationRun> {
        self.state.get_state(identifier)
    }

    /// Wait for another caller's in-progress run to settle.
    pub async fn wait_for_completion(&self, identifier: &str) -> Result<VerificationRun> {
        self.state
            .wait_for_completion(identifier, self.config.wait_timeout)
            .await
    }

    /// Forget a run and its cached resources.
    pub fn discard(&self, identifier: &str) {
        if let Some(run) = self.state.get_state(identifier) {
            let mut ids: Vec<String> = run.path_to_content_id.values().cloned().collect();
            if let Some(cid) = run.content_id {
                ids.push(cid);
            }
            self.cache.clear_for(&ids);
        }
        self.state.clear(identifier);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.cache.stats(),
            tracked_runs: self.state.len(),
            blacklisted_gateways: self.health.len(),
        }
    }

    /// Spawn the periodic retention sweep over the run table and the
    /// health blacklist. Dropping the returned handle does not stop it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(engine.config.sweep_interval).await;
                engine.state.sweep(engine.config.run_retention);
                engine.health.sweep();
            }
        })
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn health(&self) -> &GatewayHealth {
        &self.health
    }
}
