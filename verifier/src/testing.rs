//! Deterministic network simulation for tests.
//!
//! `MockFetch` maps `(method, url)` routes to canned responses and tracks
//! request accounting (per-URL hits, peak concurrency). `TestStrategy` is a
//! digest oracle seeded directly, so verification tests don't need to wire
//! a trusted gateway behind every assertion.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{DIGEST_HEADER, RESOLVED_ID_HEADER, raw_url};
use crate::error::{Result, VerifyError};
use crate::fetch::{FetchClient, FetchResponse, origin_of};
use crate::resolver::name_probe_url;
use crate::strategy::{VerificationStrategy, digest_b64};

/// A 43-character content id filled with `c`.
pub fn cid(c: char) -> String {
    c.to_string().repeat(43)
}

/// Manifest JSON with the given `(path, id)` entries, object form.
pub fn manifest_json(entries: &[(&str, &str)]) -> String {
    let paths = entries
        .iter()
        .map(|(p, id)| format!(r#""{p}": {{ "id": "{id}" }}"#))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{ "manifest": "arweave/paths", "version": "0.2.0", "paths": {{ {paths} }} }}"#
    )
}

#[derive(Clone)]
struct CannedResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
}

/// Route-table fetch client with request accounting.
#[derive(Default)]
pub struct MockFetch {
    routes: DashMap<String, CannedResponse>,
    url_hits: DashMap<String, usize>,
    total: AtomicUsize,
    gets: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: RwLock<Option<Duration>>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(method: &str, url: &str) -> String {
        format!("{method} {url}")
    }

    /// Route an arbitrary response.
    pub fn route(
        &self,
        method: &str,
        url: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: &[u8],
    ) {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        self.routes.insert(
            Self::key(method, url),
            CannedResponse {
                status,
                headers,
                body: Bytes::copy_from_slice(body),
            },
        );
    }

    /// Route a bare status with no headers or body.
    pub fn route_status(&self, method: &str, url: &str, status: u16) {
        self.route(method, url, status, &[], b"");
    }

    /// Route a successful name-resolution probe on `origin`.
    pub fn route_resolution(&self, name: &str, origin: &str, content_id: &str) {
        let url = name_probe_url(name, origin);
        self.route("HEAD", &url, 200, &[(RESOLVED_ID_HEADER, content_id)], b"");
    }

    /// Route raw content (GET body + HEAD metadata) without a digest header.
    pub fn route_raw(&self, origin: &str, content_id: &str, body: &[u8], content_type: &str) {
        let url = raw_url(origin, content_id);
        self.route("GET", &url, 200, &[("content-type", content_type)], body);
        self.route("HEAD", &url, 200, &[("content-type", content_type)], b"");
    }

    /// Route raw content whose HEAD carries the trusted digest header.
    pub fn route_raw_with_digest(&self, origin: &str, content_id: &str, body: &[u8]) {
        let url = raw_url(origin, content_id);
        let digest = digest_b64(body);
        let headers: &[(&str, &str)] = &[
            ("content-type", "application/octet-stream"),
            (DIGEST_HEADER, digest.as_str()),
        ];
        self.route("GET", &url, 200, headers, body);
        self.route("HEAD", &url, 200, headers, b"");
    }

    /// Delay applied to every request, for concurrency observation.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    pub fn request_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Requests seen for `url`, any method.
    pub fn hits(&self, url: &str) -> usize {
        self.url_hits.get(url).map(|v| *v).unwrap_or(0)
    }

    /// Highest number of simultaneously in-flight requests observed.
    pub fn max_concurrent(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    async fn respond(&self, method: &str, url: &str) -> Result<FetchResponse> {
        self.total.fetch_add(1, Ordering::Relaxed);
        if method == "GET" {
            self.gets.fetch_add(1, Ordering::Relaxed);
        }
        *self.url_hits.entry(url.to_string()).or_insert(0) += 1;

        let in_flight = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = match self.routes.get(&Self::key(method, url)) {
            Some(canned) => Ok(FetchResponse {
                status: canned.status,
                headers: canned.headers.clone(),
                body: canned.body.clone(),
            }),
            None => Err(VerifyError::gateway(
                origin_of(url),
                "connection refused (no route)",
            )),
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl FetchClient for MockFetch {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<FetchResponse> {
        self.respond("GET", url).await
    }

    async fn head(&self, url: &str, _timeout: Duration) -> Result<FetchResponse> {
        self.respond("HEAD", url).await
    }
}

/// Digest oracle seeded directly with trusted bytes.
pub struct TestStrategy {
    digests: DashMap<String, String>,
}

impl TestStrategy {
    pub fn trusting(entries: &[(&str, &[u8])]) -> Self {
        let strategy = TestStrategy {
            digests: DashMap::new(),
        };
        for (id, bytes) in entries {
            strategy.trust(id, bytes);
        }
        strategy
    }

    /// Register the trusted bytes for `content_id`.
    pub fn trust(&self, content_id: &str, bytes: &[u8]) {
        self.digests
            .insert(content_id.to_string(), digest_b64(bytes));
    }
}

#[async_trait]
impl VerificationStrategy for TestStrategy {
    async fn verify_resource(&self, content_id: &str, bytes: &[u8]) -> Result<()> {
        let trusted = self.trusted_digest(content_id).await?;
        if digest_b64(bytes) != trusted {
            return Err(VerifyError::HashMismatch {
                content_id: content_id.to_string(),
            });
        }
        Ok(())
    }

    async fn trusted_digest(&self, content_id: &str) -> Result<String> {
        self.digests
            .get(content_id)
            .map(|d| d.clone())
            .ok_or_else(|| VerifyError::gateway("trusted-pool", "no trusted digest registered"))
    }
}
