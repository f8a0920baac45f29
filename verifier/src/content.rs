//! Manifest-level content fetch and verification.
//!
//! Fetches raw bytes for a content id from the routing origin, verifies the
//! digest against an independently trusted one, and decides whether the
//! bytes are a path manifest. Origins do not always set the manifest
//! content type correctly, so detection falls back to a schema sniff.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{ResourceCache, resource_from_parts};
use crate::config::raw_url;
use crate::error::{Result, VerifyError};
use crate::fetch::FetchClient;
use crate::strategy::{VerificationStrategy, digest_b64};
use common::{MANIFEST_CONTENT_TYPE, PathManifest};

/// Outcome of a manifest-level fetch: verified bytes, plus the parsed
/// manifest when the content is one.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub content_id: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub manifest: Option<PathManifest>,
}

impl FetchedContent {
    pub fn is_manifest(&self) -> bool {
        self.manifest.is_some()
    }
}

/// Fetch `content_id` from `origin`, verify it, and cache the bytes.
///
/// Digest comparison happens before any parse result is trusted; a
/// mismatch aborts verification of this id and anything depending on it.
pub async fn fetch_and_verify(
    fetch: &Arc<dyn FetchClient>,
    strategy: &Arc<dyn VerificationStrategy>,
    cache: &ResourceCache,
    origin: &str,
    content_id: &str,
    timeout: Duration,
) -> Result<FetchedContent> {
    let url = raw_url(origin, content_id);
    let resp = fetch.get(&url, timeout).await?;
    if !resp.is_success() {
        return Err(VerifyError::gateway(origin, format!("HTTP {}", resp.status)));
    }

    let content_type = resp
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = resp.body.clone();

    let computed = digest_b64(&bytes);
    let trusted = strategy.trusted_digest(content_id).await?;
    if computed != trusted {
        warn!(
            content_id = %content_id,
            origin = %origin,
            "Digest mismatch on manifest-level content"
        );
        return Err(VerifyError::HashMismatch {
            content_id: content_id.to_string(),
        });
    }

    let manifest = detect_manifest(content_id, &content_type, &bytes)?;

    let headers: HashMap<String, String> = resp
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    cache.set(resource_from_parts(
        content_id,
        &content_type,
        bytes.clone(),
        headers,
    ));

    debug!(
        content_id = %content_id,
        origin = %origin,
        manifest = manifest.is_some(),
        size = bytes.len(),
        "Content fetched and verified"
    );
    Ok(FetchedContent {
        content_id: content_id.to_string(),
        content_type,
        bytes,
        manifest,
    })
}

/// Decide whether verified bytes are a manifest.
///
/// The declared content type is authoritative when present: if it names the
/// manifest type, the bytes must parse (`ManifestParse` otherwise). Any
/// other content type falls back to the best-effort sniff.
fn detect_manifest(
    content_id: &str,
    content_type: &str,
    bytes: &[u8],
) -> Result<Option<PathManifest>> {
    if content_type == MANIFEST_CONTENT_TYPE {
        let manifest =
            PathManifest::parse(bytes).map_err(|reason| VerifyError::ManifestParse {
                content_id: content_id.to_string(),
                reason,
            })?;
        return Ok(Some(manifest));
    }
    if PathManifest::sniff(bytes) {
        // Sniff succeeded, so the parse cannot fail here
        return Ok(PathManifest::parse(bytes).ok());
    }
    Ok(None)
}
