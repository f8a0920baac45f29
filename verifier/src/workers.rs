//! Bounded-concurrency resource verification fan-out.
//!
//! Every resource a verified manifest references is fetched and verified
//! with a bounded number of in-flight tasks. Admission is per-task via
//! owned semaphore permits: a new fetch starts as soon as any in-flight one
//! finishes, keeping the pool saturated instead of draining in batches.
//!
//! Per-resource failures are recorded on the run, never propagated; the
//! run can still end `partial` and serve what did verify.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{ResourceCache, resource_from_parts};
use crate::config::{VerifierConfig, raw_url};
use crate::error::VerifyError;
use crate::fetch::FetchClient;
use crate::health::GatewayHealth;
use crate::state::{FALLBACK_PATH, StateMachine};
use crate::strategy::VerificationStrategy;
use common::PathManifest;

/// Verify every resource `manifest` references, with multi-origin fallback.
///
/// `primary_origin` is tried first for each resource, then the remaining
/// pool in order, deduplicated. Completion of the run is the state
/// machine's business; this function only reports outcomes and returns
/// once every task has finished.
#[allow(clippy::too_many_arguments)]
pub async fn verify_all(
    fetch: Arc<dyn FetchClient>,
    strategy: Arc<dyn VerificationStrategy>,
    cache: Arc<ResourceCache>,
    health: Arc<GatewayHealth>,
    state: Arc<StateMachine>,
    config: &VerifierConfig,
    identifier: &str,
    run_id: u64,
    manifest: &PathManifest,
    primary_origin: &str,
    fallback_origins: &[String],
) {
    let mut items: Vec<(String, String)> = manifest
        .entries()
        .map(|(p, id)| (p.to_string(), id.to_string()))
        .collect();
    if let Some(fb) = manifest.fallback_id() {
        items.push((FALLBACK_PATH.to_string(), fb.to_string()));
    }

    let mut origins: Vec<String> = vec![primary_origin.to_string()];
    for origin in fallback_origins {
        if !origins.contains(origin) {
            origins.push(origin.clone());
        }
    }
    let origins = Arc::new(origins);

    let limit = config.effective_concurrency();
    let semaphore = Arc::new(Semaphore::new(limit));
    let attempts = config.origin_attempts.max(1);
    let resource_timeout = config.resource_timeout;
    let health_ttl = config.health_ttl;

    debug!(
        identifier = %identifier,
        run_id,
        resources = items.len(),
        origins = origins.len(),
        limit,
        "Starting resource fan-out"
    );

    let mut handles = Vec::with_capacity(items.len());
    for (path, content_id) in items {
        let fetch = fetch.clone();
        let strategy = strategy.clone();
        let cache = cache.clone();
        let health = health.clone();
        let state = state.clone();
        let origins = origins.clone();
        let semaphore = semaphore.clone();
        let identifier = identifier.to_string();

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            // Idempotent re-entry: a retried or overlapping run skips
            // resources that already verified.
            if cache.has(&content_id) {
                state.record_verified(&identifier, run_id, &content_id, &path);
                return;
            }

            let mut last_err = "no origins available".to_string();
            for origin in origins.iter().take(attempts) {
                let url = raw_url(origin, &content_id);
                let resp = match fetch.get(&url, resource_timeout).await {
                    Ok(resp) if resp.is_success() => resp,
                    Ok(resp) => {
                        last_err = format!("{origin}: HTTP {}", resp.status);
                        continue;
                    }
                    Err(e) => {
                        last_err = e.to_string();
                        continue;
                    }
                };

                match strategy.verify_resource(&content_id, &resp.body).await {
                    Ok(()) => {
                        let content_type = resp
                            .content_type()
                            .unwrap_or("application/octet-stream")
                            .to_string();
                        let headers: HashMap<String, String> = resp.headers.clone();
                        cache.set(resource_from_parts(
                            &content_id,
                            &content_type,
                            resp.body,
                            headers,
                        ));
                        state.record_verified(&identifier, run_id, &content_id, &path);
                        return;
                    }
                    Err(VerifyError::HashMismatch { .. }) => {
                        // The origin served bytes that fail the digest:
                        // Byzantine or corrupted, either way blacklist it.
                        warn!(
                            origin = %origin,
                            content_id = %content_id,
                            "Origin served resource failing digest verification"
                        );
                        health.mark_unhealthy(origin, health_ttl, "digest verification failed");
                        last_err = format!("{origin}: digest verification failed");
                    }
                    Err(e) => {
                        last_err = e.to_string();
                    }
                }
            }

            state.record_failed(&identifier, run_id, &content_id, &path, &last_err);
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunStatus;
    use crate::testing::{MockFetch, TestStrategy, cid, manifest_json};
    use common::NullSink;
    use std::time::Duration;

    const PRIMARY: &str = "https://primary.example";
    const BACKUP: &str = "https://backup.example";
    const BACKUP2: &str = "https://backup2.example";

    struct Fixture {
        fetch: Arc<MockFetch>,
        strategy: Arc<TestStrategy>,
        cache: Arc<ResourceCache>,
        health: Arc<GatewayHealth>,
        state: Arc<StateMachine>,
        config: VerifierConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                fetch: Arc::new(MockFetch::new()),
                strategy: Arc::new(TestStrategy::trusting(&[])),
                cache: Arc::new(ResourceCache::new(100 * 1024 * 1024)),
                health: Arc::new(GatewayHealth::new()),
                state: Arc::new(StateMachine::new(Arc::new(NullSink))),
                config: VerifierConfig::default(),
            }
        }

        fn start_run(&self, identifier: &str, manifest: &PathManifest) -> u64 {
            let run_id = self.state.start(identifier);
            self.state
                .set_resolved(identifier, run_id, &cid('M'), Some(PRIMARY));
            self.state.set_manifest_loaded(
                identifier,
                run_id,
                Arc::new(manifest.clone()),
                false,
            );
            run_id
        }

        async fn verify_all(
            &self,
            identifier: &str,
            run_id: u64,
            manifest: &PathManifest,
            fallbacks: &[String],
        ) {
            verify_all(
                self.fetch.clone(),
                self.strategy.clone(),
                self.cache.clone(),
                self.health.clone(),
                self.state.clone(),
                &self.config,
                identifier,
                run_id,
                manifest,
                PRIMARY,
                fallbacks,
            )
            .await;
        }
    }

    fn three_path_manifest() -> (PathManifest, [String; 3]) {
        let ids = [cid('1'), cid('2'), cid('3')];
        let json = manifest_json(&[
            ("index.html", ids[0].as_str()),
            ("a.js", ids[1].as_str()),
            ("b.js", ids[2].as_str()),
        ]);
        (PathManifest::parse(json.as_bytes()).unwrap(), ids)
    }

    #[tokio::test]
    async fn test_all_resources_verify_and_complete() {
        let fx = Fixture::new();
        let (manifest, ids) = three_path_manifest();
        for (i, id) in ids.iter().enumerate() {
            let body = format!("body {i}");
            fx.fetch.route_raw(PRIMARY, id, body.as_bytes(), "text/plain");
            fx.strategy.trust(id, body.as_bytes());
        }
        let run_id = fx.start_run("site", &manifest);
        fx.verify_all("site", run_id, &manifest, &[]).await;

        let run = fx.state.get_state("site").unwrap();
        assert_eq!(run.status, RunStatus::Complete);
        assert_eq!(run.verified_count, 3);
        for id in &ids {
            assert!(fx.cache.get(id).is_some());
        }
    }

    #[tokio::test]
    async fn test_partial_completion_when_one_resource_always_fails() {
        let fx = Fixture::new();
        let (manifest, ids) = three_path_manifest();
        for (i, id) in ids.iter().enumerate() {
            let body = format!("body {i}");
            if i == 1 {
                // a.js 500s from every origin
                fx.fetch.route_status("GET", &raw_url(PRIMARY, id), 500);
                fx.fetch.route_status("GET", &raw_url(BACKUP, id), 500);
                fx.fetch.route_status("GET", &raw_url(BACKUP2, id), 500);
            } else {
                fx.fetch.route_raw(PRIMARY, id, body.as_bytes(), "text/plain");
            }
            fx.strategy.trust(id, body.as_bytes());
        }
        let run_id = fx.start_run("site", &manifest);
        fx.verify_all(
            "site",
            run_id,
            &manifest,
            &[BACKUP.to_string(), BACKUP2.to_string()],
        )
        .await;

        let run = fx.state.get_state("site").unwrap();
        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.verified_count, 2);
        assert_eq!(run.failed_ids.len(), 1);
        assert!(run.failed_ids.contains(&ids[1]));
        assert!(fx.cache.get(&ids[0]).is_some());
        assert!(fx.cache.get(&ids[2]).is_some());
        assert!(fx.cache.get(&ids[1]).is_none());
        // Every origin was attempted for the failing resource
        assert_eq!(fx.fetch.hits(&raw_url(BACKUP2, &ids[1])), 1);
    }

    #[tokio::test]
    async fn test_concurrency_stays_within_limit() {
        let mut fx = Fixture::new();
        fx.config.concurrency = 3;
        fx.fetch.set_delay(Duration::from_millis(30));

        let ids: Vec<String> = (0..10u32)
            .map(|i| cid(char::from_digit(i, 10).unwrap()))
            .collect();
        let paths: Vec<String> = (0..10).map(|i| format!("f{i}.bin")).collect();
        let entries: Vec<(&str, &str)> = paths
            .iter()
            .zip(ids.iter())
            .map(|(p, id)| (p.as_str(), id.as_str()))
            .collect();
        let json = manifest_json(&entries);
        let manifest = PathManifest::parse(json.as_bytes()).unwrap();
        for id in &ids {
            fx.fetch.route_raw(PRIMARY, id, b"data", "text/plain");
            fx.strategy.trust(id, b"data");
        }

        let run_id = fx.start_run("site", &manifest);
        fx.verify_all("site", run_id, &manifest, &[]).await;

        assert_eq!(
            fx.state.get_state("site").unwrap().status,
            RunStatus::Complete
        );
        assert!(
            fx.fetch.max_concurrent() <= 3,
            "observed {} concurrent fetches",
            fx.fetch.max_concurrent()
        );
    }

    #[tokio::test]
    async fn test_cached_resources_skip_the_network() {
        let fx = Fixture::new();
        let (manifest, ids) = three_path_manifest();
        for (i, id) in ids.iter().enumerate() {
            let body = format!("body {i}");
            fx.fetch.route_raw(PRIMARY, id, body.as_bytes(), "text/plain");
            fx.strategy.trust(id, body.as_bytes());
        }
        // Pre-seed one resource as already verified
        fx.cache.set(crate::cache::resource_from_parts(
            &ids[0],
            "text/plain",
            bytes::Bytes::from_static(b"body 0"),
            HashMap::new(),
        ));

        let run_id = fx.start_run("site", &manifest);
        fx.verify_all("site", run_id, &manifest, &[]).await;

        let run = fx.state.get_state("site").unwrap();
        assert_eq!(run.status, RunStatus::Complete);
        assert_eq!(run.verified_count, 3);
        assert_eq!(fx.fetch.hits(&raw_url(PRIMARY, &ids[0])), 0);
    }

    #[tokio::test]
    async fn test_fallback_origin_rescues_resource() {
        let fx = Fixture::new();
        let (manifest, ids) = three_path_manifest();
        for (i, id) in ids.iter().enumerate() {
            let body = format!("body {i}");
            fx.strategy.trust(id, body.as_bytes());
            if i == 1 {
                fx.fetch.route_status("GET", &raw_url(PRIMARY, id), 502);
                fx.fetch.route_raw(BACKUP, id, body.as_bytes(), "text/plain");
            } else {
                fx.fetch.route_raw(PRIMARY, id, body.as_bytes(), "text/plain");
            }
        }
        let run_id = fx.start_run("site", &manifest);
        fx.verify_all("site", run_id, &manifest, &[BACKUP.to_string()])
            .await;

        assert_eq!(
            fx.state.get_state("site").unwrap().status,
            RunStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_corrupt_origin_blacklisted_and_next_tried() {
        let fx = Fixture::new();
        let id = cid('1');
        let json = manifest_json(&[("index.html", id.as_str())]);
        let manifest = PathManifest::parse(json.as_bytes()).unwrap();
        fx.strategy.trust(&id, b"real body");
        fx.fetch.route_raw(PRIMARY, &id, b"corrupted!", "text/plain");
        fx.fetch.route_raw(BACKUP, &id, b"real body", "text/plain");

        let run_id = fx.start_run("site", &manifest);
        fx.verify_all("site", run_id, &manifest, &[BACKUP.to_string()])
            .await;

        assert_eq!(
            fx.state.get_state("site").unwrap().status,
            RunStatus::Complete
        );
        assert!(!fx.health.is_healthy(PRIMARY));
        assert!(fx.health.is_healthy(BACKUP));
    }

    #[tokio::test]
    async fn test_fallback_entry_is_verified_too() {
        let fx = Fixture::new();
        let fb = cid('9');
        let id = cid('1');
        let json = format!(
            r#"{{
              "manifest": "arweave/paths",
              "version": "0.2.0",
              "paths": {{ "index.html": {{ "id": "{id}" }} }},
              "fallback": {{ "id": "{fb}" }}
            }}"#
        );
        let manifest = PathManifest::parse(json.as_bytes()).unwrap();
        for (cid_, body) in [(&id, b"main".as_slice()), (&fb, b"404 page".as_slice())] {
            fx.fetch.route_raw(PRIMARY, cid_, body, "text/html");
            fx.strategy.trust(cid_, body);
        }
        let run_id = fx.start_run("site", &manifest);
        fx.verify_all("site", run_id, &manifest, &[]).await;

        let run = fx.state.get_state("site").unwrap();
        assert_eq!(run.status, RunStatus::Complete);
        assert_eq!(run.total_resources, 2);
        assert!(fx.cache.has(&fb));
    }
}
