//! Injected network fetch capability.
//!
//! The engine never constructs its own transport; every network call goes
//! through `FetchClient`. `HttpFetchClient` is the production reqwest-backed
//! implementation; tests inject a deterministic mock.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Result, VerifyError};

/// A completed HTTP exchange. Header names are lowercased on construction.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        // Strip any charset suffix: "text/html; charset=utf-8" -> "text/html"
        self.header("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Network capability consumed by the engine.
///
/// Implementations must enforce the timeout themselves and abort the
/// in-flight request when it expires.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
    async fn head(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// Production fetch client backed by a pooled reqwest client.
pub struct HttpFetchClient {
    client: reqwest::Client,
}

impl HttpFetchClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchResponse> {
        let origin = origin_of(url);
        let response = self
            .client
            .request(method, url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| VerifyError::gateway(origin.clone(), e.to_string()))?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| VerifyError::gateway(origin, e.to_string()))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for HttpFetchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        self.send(reqwest::Method::GET, url, timeout).await
    }

    async fn head(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        self.send(reqwest::Method::HEAD, url, timeout).await
    }
}

/// Scheme + host portion of a URL, for error attribution.
pub fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            let end = rest.find('/').unwrap_or(rest.len());
            format!("{}{}", &url[..i + 3], &rest[..end])
        }
        None => url.split('/').next().unwrap_or(url).to_string(),
    }
}

/// Hostname of an origin or URL: scheme, credentials, port, and path
/// stripped. Health state is keyed on this.
pub fn hostname_of(origin: &str) -> String {
    let rest = match origin.find("://") {
        Some(i) => &origin[i + 3..],
        None => origin,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);
    host.to_ascii_lowercase()
}
