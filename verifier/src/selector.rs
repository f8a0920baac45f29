//! Working-gateway selection.
//!
//! Given a candidate origin list, find one origin that actually responds.
//! Candidates are health-filtered first; when filtering empties the list,
//! the blacklist is cleared wholesale and the full list is retried. Every
//! entry expiring around the same time must not lock the engine out of the
//! network, and the usable pool must not shrink without bound.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PROBE_PATH;
use crate::error::{Result, VerifyError};
use crate::fetch::FetchClient;
use crate::health::GatewayHealth;

/// What to do when every candidate fails the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustPolicy {
    /// Raise `AllGatewaysFailed` (resolution and manifest call sites).
    Fail,
    /// Fall back to the first candidate unfiltered (best-effort serving).
    FirstCandidate,
}

/// Probe candidates in order until one responds; mark failures unhealthy.
///
/// Callers wanting load distribution shuffle `candidates` beforehand.
pub async fn select_working(
    fetch: &Arc<dyn FetchClient>,
    health: &GatewayHealth,
    candidates: &[String],
    probe_timeout: Duration,
    health_ttl: Duration,
    on_exhausted: ExhaustPolicy,
) -> Result<String> {
    if candidates.is_empty() {
        return Err(VerifyError::AllGatewaysFailed);
    }

    let mut usable = health.filter_healthy(candidates);
    if usable.is_empty() {
        warn!(
            candidates = candidates.len(),
            "All candidates blacklisted; clearing gateway blacklist"
        );
        health.clear();
        usable = candidates.to_vec();
    }

    for origin in &usable {
        let url = format!("{}{}", origin.trim_end_matches('/'), PROBE_PATH);
        match fetch.head(&url, probe_timeout).await {
            Ok(resp) if resp.is_success() => {
                debug!(origin = %origin, "Selected working gateway");
                return Ok(origin.clone());
            }
            Ok(resp) => {
                health.mark_unhealthy(origin, health_ttl, &format!("HTTP {}", resp.status));
            }
            Err(e) => {
                health.mark_unhealthy(origin, health_ttl, &e.to_string());
            }
        }
    }

    match on_exhausted {
        ExhaustPolicy::Fail => Err(VerifyError::AllGatewaysFailed),
        ExhaustPolicy::FirstCandidate => {
            let first = candidates[0].clone();
            warn!(origin = %first, "Every candidate failed probing; serving best-effort from first");
            Ok(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetch;

    fn origins(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn probe_url(origin: &str) -> String {
        format!("{origin}{PROBE_PATH}")
    }

    async fn run_select(
        fetch: &Arc<MockFetch>,
        health: &GatewayHealth,
        candidates: &[String],
        policy: ExhaustPolicy,
    ) -> Result<String> {
        let fetch: Arc<dyn FetchClient> = fetch.clone();
        select_working(
            &fetch,
            health,
            candidates,
            Duration::from_secs(10),
            Duration::from_secs(300),
            policy,
        )
        .await
    }

    #[tokio::test]
    async fn test_first_responding_candidate_wins() {
        let fetch = Arc::new(MockFetch::new());
        fetch.route_status("HEAD", &probe_url("https://g1.example"), 503);
        fetch.route_status("HEAD", &probe_url("https://g2.example"), 200);
        fetch.route_status("HEAD", &probe_url("https://g3.example"), 200);
        let health = GatewayHealth::new();

        let chosen = run_select(
            &fetch,
            &health,
            &origins(&["https://g1.example", "https://g2.example", "https://g3.example"]),
            ExhaustPolicy::Fail,
        )
        .await
        .unwrap();
        assert_eq!(chosen, "https://g2.example");
        // The failure got recorded
        assert!(!health.is_healthy("https://g1.example"));
        // g3 never probed
        assert_eq!(fetch.hits(&probe_url("https://g3.example")), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_candidates_skipped() {
        let fetch = Arc::new(MockFetch::new());
        fetch.route_status("HEAD", &probe_url("https://g2.example"), 200);
        let health = GatewayHealth::new();
        health.mark_unhealthy("https://g1.example", Duration::from_secs(300), "old failure");

        let chosen = run_select(
            &fetch,
            &health,
            &origins(&["https://g1.example", "https://g2.example"]),
            ExhaustPolicy::Fail,
        )
        .await
        .unwrap();
        assert_eq!(chosen, "https://g2.example");
        assert_eq!(fetch.hits(&probe_url("https://g1.example")), 0);
    }

    #[tokio::test]
    async fn test_fully_blacklisted_pool_is_cleared_and_retried() {
        let fetch = Arc::new(MockFetch::new());
        fetch.route_status("HEAD", &probe_url("https://g1.example"), 200);
        let health = GatewayHealth::new();
        health.mark_unhealthy("https://g1.example", Duration::from_secs(300), "x");
        health.mark_unhealthy("https://g2.example", Duration::from_secs(300), "y");

        let chosen = run_select(
            &fetch,
            &health,
            &origins(&["https://g1.example", "https://g2.example"]),
            ExhaustPolicy::Fail,
        )
        .await
        .unwrap();
        assert_eq!(chosen, "https://g1.example");
    }

    #[tokio::test]
    async fn test_exhaustion_fail_policy() {
        let fetch = Arc::new(MockFetch::new());
        fetch.route_status("HEAD", &probe_url("https://g1.example"), 500);
        fetch.route_status("HEAD", &probe_url("https://g2.example"), 502);
        let health = GatewayHealth::new();

        let err = run_select(
            &fetch,
            &health,
            &origins(&["https://g1.example", "https://g2.example"]),
            ExhaustPolicy::Fail,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::AllGatewaysFailed));
        assert!(!health.is_healthy("https://g1.example"));
        assert!(!health.is_healthy("https://g2.example"));
    }

    #[tokio::test]
    async fn test_exhaustion_first_candidate_policy() {
        let fetch = Arc::new(MockFetch::new());
        fetch.route_status("HEAD", &probe_url("https://g1.example"), 500);
        fetch.route_status("HEAD", &probe_url("https://g2.example"), 502);
        let health = GatewayHealth::new();

        let chosen = run_select(
            &fetch,
            &health,
            &origins(&["https://g1.example", "https://g2.example"]),
            ExhaustPolicy::FirstCandidate,
        )
        .await
        .unwrap();
        assert_eq!(chosen, "https://g1.example");
    }

    #[tokio::test]
    async fn test_empty_candidate_list_fails() {
        let fetch = Arc::new(MockFetch::new());
        let health = GatewayHealth::new();
        let err = run_select(&fetch, &health, &[], ExhaustPolicy::FirstCandidate)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::AllGatewaysFailed));
    }
}
