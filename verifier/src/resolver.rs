//! Identifier resolution via multi-gateway consensus.
//!
//! A name is resolved by probing every gateway in the trusted pool in
//! parallel and requiring them to agree. One lying gateway cannot redirect
//! a name: any disagreement is `ResolutionMismatch` and the run aborts.
//! Majority vote is deliberately not used; disagreement is a security
//! event, not noise.
//!
//! Content-id-shaped identifiers skip the network entirely.

use futures::stream::{FuturesUnordered, StreamExt};
use quick_cache::sync::Cache;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{RESOLUTION_MEMO_CAPACITY, RESOLVED_ID_HEADER};
use crate::error::{Result, VerifyError};
use crate::fetch::FetchClient;
use crate::health::GatewayHealth;
use crate::pool::GatewayPools;
use common::{is_content_id, now_secs};

/// Successful resolution: the agreed content id plus the origin that
/// answered first (a routing hint, never a trust anchor).
#[derive(Debug, Clone)]
pub struct ResolvedName {
    pub content_id: String,
    pub routing_origin: Option<String>,
}

/// Name resolver over the trusted gateway pool.
pub struct Resolver {
    fetch: Arc<dyn FetchClient>,
    health: Arc<GatewayHealth>,
    pools: Arc<GatewayPools>,
    /// identifier -> (content_id, routing_origin, resolved_at). TTL is
    /// checked on read; consensus failures are never memoized.
    memo: Cache<String, (String, String, u64)>,
    memo_ttl: Duration,
    probe_timeout: Duration,
    health_ttl: Duration,
}

impl Resolver {
    pub fn new(
        fetch: Arc<dyn FetchClient>,
        health: Arc<GatewayHealth>,
        pools: Arc<GatewayPools>,
        config: &crate::config::VerifierConfig,
    ) -> Self {
        Self {
            fetch,
            health,
            pools,
            memo: Cache::new(RESOLUTION_MEMO_CAPACITY),
            memo_ttl: config.resolution_memo_ttl,
            probe_timeout: config.probe_timeout,
            health_ttl: config.health_ttl,
        }
    }

    /// Resolve `identifier` to a content id.
    pub async fn resolve(&self, identifier: &str) -> Result<ResolvedName> {
        if is_content_id(identifier) {
            return Ok(ResolvedName {
                content_id: identifier.to_string(),
                routing_origin: None,
            });
        }

        if let Some((content_id, origin, at)) = self.memo.get(identifier) {
            if now_secs().saturating_sub(at) < self.memo_ttl.as_secs() {
                debug!(identifier = %identifier, content_id = %content_id, "Resolution memo hit");
                return Ok(ResolvedName {
                    content_id,
                    routing_origin: Some(origin),
                });
            }
            self.memo.remove(identifier);
        }

        let trusted = self.pools.trusted().await?;
        if trusted.is_empty() {
            return Err(VerifyError::NoGatewaysAvailable {
                identifier: identifier.to_string(),
                reasons: "trusted gateway pool is empty".to_string(),
            });
        }

        // Health-filter, but never probe an empty set: a fully blacklisted
        // pool falls back to the full list.
        let mut candidates = self.health.filter_healthy(&trusted);
        if candidates.is_empty() {
            candidates = trusted;
        }

        let mut probes: FuturesUnordered<_> = candidates
            .iter()
            .map(|origin| {
                let url = name_probe_url(identifier, origin);
                let origin = origin.clone();
                let fetch = self.fetch.clone();
                let timeout = self.probe_timeout;
                async move {
                    let outcome = fetch.head(&url, timeout).await;
                    (origin, outcome)
                }
            })
            .collect();

        let mut distinct: BTreeSet<String> = BTreeSet::new();
        let mut first_responder: Option<String> = None;
        let mut failures: Vec<String> = Vec::new();

        while let Some((origin, outcome)) = probes.next().await {
            match outcome {
                Ok(resp) if resp.is_success() => match resp.header(RESOLVED_ID_HEADER) {
                    Some(id) if is_content_id(id) => {
                        distinct.insert(id.to_string());
                        if first_responder.is_none() {
                            first_responder = Some(origin);
                        }
                    }
                    Some(id) => {
                        failures.push(format!("{origin}: malformed resolved id '{id}'"));
                    }
                    None => {
                        failures.push(format!("{origin}: no resolution header"));
                    }
                },
                Ok(resp) => {
                    failures.push(format!("{origin}: HTTP {}", resp.status));
                }
                Err(e) => {
                    // Transport failure says something about the gateway,
                    // not the name; an HTTP status says something about the
                    // name and leaves health alone.
                    self.health
                        .mark_unhealthy(&origin, self.health_ttl, &e.to_string());
                    failures.push(format!("{origin}: {e}"));
                }
            }
        }

        if distinct.is_empty() {
            return Err(VerifyError::NoGatewaysAvailable {
                identifier: identifier.to_string(),
                reasons: failures.join("; "),
            });
        }

        if distinct.len() > 1 {
            warn!(
                identifier = %identifier,
                ids = ?distinct,
                "Trusted gateways disagree on resolution"
            );
            return Err(VerifyError::ResolutionMismatch {
                identifier: identifier.to_string(),
                ids: distinct.into_iter().collect(),
            });
        }

        let content_id = distinct.into_iter().next().unwrap_or_default();
        let routing_origin = first_responder;
        if let Some(origin) = &routing_origin {
            self.memo.insert(
                identifier.to_string(),
                (content_id.clone(), origin.clone(), now_secs()),
            );
        }
        debug!(identifier = %identifier, content_id = %content_id, "Resolved by consensus");
        Ok(ResolvedName {
            content_id,
            routing_origin,
        })
    }
}

/// Probe URL for a name on an origin: the name becomes a subdomain label,
/// `https://gw.example` -> `https://{name}.gw.example`.
pub fn name_probe_url(identifier: &str, origin: &str) -> String {
    match origin.find("://") {
        Some(i) => format!("{}{}.{}", &origin[..i + 3], identifier, &origin[i + 3..]),
        None => format!("{identifier}.{origin}"),
    }
}
