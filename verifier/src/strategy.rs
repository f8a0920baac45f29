//! Verification strategy: how bytes are proven to match a content id.
//!
//! The strategy is an injected seam. The resource-level path needs only a
//! pass/fail verdict for `(content_id, bytes)`; the manifest-level path
//! additionally needs an independently trusted digest to compare against.
//!
//! The default `DigestStrategy` asks a trusted gateway for the digest via a
//! HEAD probe; when the gateway omits the digest header it falls back to a
//! full fetch from that trusted gateway and hashes locally. The double
//! fetch is deliberate: some trusted origins are known not to emit the
//! header, and silently skipping verification is not an option.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{DIGEST_HEADER, raw_url};
use crate::error::{Result, VerifyError};
use crate::fetch::FetchClient;
use crate::health::GatewayHealth;
use crate::pool::GatewayPools;

/// SHA-256 of `bytes`, base64url without padding: the wire rendering used
/// by digest headers.
pub fn digest_b64(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    URL_SAFE_NO_PAD.encode(digest)
}

/// Proves that fetched bytes are the content a content id names.
#[async_trait]
pub trait VerificationStrategy: Send + Sync {
    /// Pass/fail verdict for a resource fetched from an untrusted origin.
    async fn verify_resource(&self, content_id: &str, bytes: &[u8]) -> Result<()>;

    /// An independently trusted digest for `content_id`, in the
    /// base64url-no-pad rendering of `digest_b64`.
    async fn trusted_digest(&self, content_id: &str) -> Result<String>;
}

/// Default strategy: digest comparison against the trusted gateway pool.
pub struct DigestStrategy {
    fetch: Arc<dyn FetchClient>,
    pools: Arc<GatewayPools>,
    health: Arc<GatewayHealth>,
    probe_timeout: Duration,
}

impl DigestStrategy {
    pub fn new(
        fetch: Arc<dyn FetchClient>,
        pools: Arc<GatewayPools>,
        health: Arc<GatewayHealth>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            fetch,
            pools,
            health,
            probe_timeout,
        }
    }

    /// Trusted digest from one origin: header first, full fetch second.
    async fn digest_from(&self, origin: &str, content_id: &str) -> Result<String> {
        let url = raw_url(origin, content_id);

        match self.fetch.head(&url, self.probe_timeout).await {
            Ok(resp) if resp.is_success() => {
                if let Some(digest) = resp.header(DIGEST_HEADER) {
                    return Ok(digest.to_string());
                }
                debug!(origin = %origin, content_id = %content_id, "No digest header; refetching to hash locally");
            }
            Ok(resp) => {
                return Err(VerifyError::gateway(origin, format!("HTTP {}", resp.status)));
            }
            Err(e) => return Err(e),
        }

        // Header absent: fetch the bytes from the trusted origin and hash
        // them ourselves. Costs a second full download for this path.
        let resp = self.fetch.get(&url, self.probe_timeout).await?;
        if !resp.is_success() {
            return Err(VerifyError::gateway(origin, format!("HTTP {}", resp.status)));
        }
        Ok(digest_b64(&resp.body))
    }
}

#[async_trait]
impl VerificationStrategy for DigestStrategy {
    async fn verify_resource(&self, content_id: &str, bytes: &[u8]) -> Result<()> {
        let trusted = self.trusted_digest(content_id).await?;
        let computed = digest_b64(bytes);
        if computed != trusted {
            warn!(content_id = %content_id, "Digest mismatch on resource");
            return Err(VerifyError::HashMismatch {
                content_id: content_id.to_string(),
            });
        }
        Ok(())
    }

    async fn trusted_digest(&self, content_id: &str) -> Result<String> {
        let trusted = self.pools.trusted().await?;
        let mut candidates = self.health.filter_healthy(&trusted);
        if candidates.is_empty() {
            candidates = trusted;
        }
        if candidates.is_empty() {
            return Err(VerifyError::AllGatewaysFailed);
        }

        let mut last_err = VerifyError::AllGatewaysFailed;
        for origin in &candidates {
            match self.digest_from(origin, content_id).await {
                Ok(digest) => return Ok(digest),
                Err(e) => {
                    debug!(origin = %origin, content_id = %content_id, error = %e, "Trusted digest attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::pool::GatewayEntry;
    use crate::testing::{MockFetch, cid};

    async fn fixture(fetch: Arc<MockFetch>, origins: &[&str]) -> DigestStrategy {
        let pools = Arc::new(GatewayPools::new(
            Arc::new(MemoryKv::new()),
            Duration::from_secs(60),
            5,
        ));
        let entries: Vec<GatewayEntry> = origins
            .iter()
            .enumerate()
            .map(|(i, o)| GatewayEntry {
                origin: o.to_string(),
                stake: 100 - i as u64,
            })
            .collect();
        pools.set_registry(&entries).await.unwrap();
        DigestStrategy::new(
            fetch,
            pools,
            Arc::new(GatewayHealth::new()),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_digest_b64_is_urlsafe_no_pad() {
        let d = digest_b64(b"hello world");
        assert!(!d.contains('='));
        assert!(!d.contains('+'));
        assert!(!d.contains('/'));
        // SHA-256 -> 32 bytes -> 43 base64url chars
        assert_eq!(d.len(), 43);
    }

    #[tokio::test]
    async fn test_trusted_digest_prefers_header() {
        let fetch = Arc::new(MockFetch::new());
        let id = cid('A');
        let body = b"content bytes".to_vec();
        fetch.route_raw_with_digest("https://trusted.example", &id, &body);
        let strategy = fixture(fetch.clone(), &["https://trusted.example"]).await;

        let digest = strategy.trusted_digest(&id).await.unwrap();
        assert_eq!(digest, digest_b64(&body));
        // HEAD only; the body was never downloaded
        assert_eq!(fetch.get_count(), 0);
    }

    #[tokio::test]
    async fn test_trusted_digest_falls_back_to_full_fetch() {
        let fetch = Arc::new(MockFetch::new());
        let id = cid('A');
        let body = b"content bytes".to_vec();
        // Raw route without a digest header
        fetch.route_raw("https://trusted.example", &id, &body, "application/octet-stream");
        let strategy = fixture(fetch.clone(), &["https://trusted.example"]).await;

        let digest = strategy.trusted_digest(&id).await.unwrap();
        assert_eq!(digest, digest_b64(&body));
        assert_eq!(fetch.get_count(), 1);
    }

    #[tokio::test]
    async fn test_trusted_digest_tries_next_trusted_gateway() {
        let fetch = Arc::new(MockFetch::new());
        let id = cid('A');
        let body = b"content bytes".to_vec();
        fetch.route_status("HEAD", &raw_url("https://down.example", &id), 500);
        fetch.route_raw_with_digest("https://up.example", &id, &body);
        let strategy = fixture(fetch, &["https://down.example", "https://up.example"]).await;

        let digest = strategy.trusted_digest(&id).await.unwrap();
        assert_eq!(digest, digest_b64(&body));
    }

    #[tokio::test]
    async fn test_verify_resource_verdicts() {
        let fetch = Arc::new(MockFetch::new());
        let id = cid('A');
        let body = b"the real bytes".to_vec();
        fetch.route_raw_with_digest("https://trusted.example", &id, &body);
        let strategy = fixture(fetch, &["https://trusted.example"]).await;

        assert!(strategy.verify_resource(&id, &body).await.is_ok());
        let err = strategy
            .verify_resource(&id, b"tampered bytes")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_empty_trusted_pool_fails() {
        let fetch = Arc::new(MockFetch::new());
        let strategy = fixture(fetch, &[]).await;
        let err = strategy.trusted_digest(&cid('A')).await.unwrap_err();
        assert!(matches!(err, VerifyError::AllGatewaysFailed));
    }
}
