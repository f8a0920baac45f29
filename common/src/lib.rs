//! Common types for the verified content resolver.
//!
//! This crate provides the shared vocabulary used across the resolver
//! components:
//! - **Content ids**: shape checks for content-addressed identifiers
//! - **Path manifests**: the wire format mapping logical paths to content ids
//! - **Progress events**: the publish/subscribe contract between the
//!   verification engine and whatever surface presents progress
//! - **Clock helpers**: `now_secs` / `now_millis`
//!
//! # Identifiers
//!
//! An identifier handed to the engine is either a human-readable name
//! (resolved through gateway consensus) or a 43-character base64url content
//! id addressing an immutable blob directly. `is_content_id` distinguishes
//! the two; nothing else in the system ever guesses.

pub mod manifest;

pub use manifest::{
    MANIFEST_CONTENT_TYPE, MANIFEST_MARKER, ManifestIndex, ManifestTarget, PathManifest,
};

/// Length of a content id: 43 base64url characters (256 bits, unpadded).
pub const CONTENT_ID_LEN: usize = 43;

/// Returns true when `s` has the shape of a content id.
///
/// Shape only: a well-formed id is not necessarily retrievable.
pub fn is_content_id(s: &str) -> bool {
    s.len() == CONTENT_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Current Unix timestamp in seconds. Returns 0 if the clock is before epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Progress event published by the verification engine.
///
/// This is the only coupling point between the engine and a presentation
/// surface. Events are fire-and-forget; a sink must never block the
/// publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationEvent {
    /// A new verification run was started for `identifier`.
    Started { identifier: String },
    /// The gateway chosen to route content fetches for this run.
    RoutingGateway { identifier: String, origin: String },
    /// The manifest was fetched and verified; fan-out begins.
    ManifestLoaded {
        identifier: String,
        content_id: String,
        total: usize,
    },
    /// A resource finished (verified or failed); counts are cumulative.
    Progress {
        identifier: String,
        content_id: Option<String>,
        current: usize,
        total: usize,
    },
    /// The run reached a terminal state with at least one verified resource.
    Complete {
        identifier: String,
        content_id: Option<String>,
        verified: usize,
        failed: usize,
    },
    /// The run failed outright (manifest-level error, or zero resources verified).
    Failed { identifier: String, error: String },
}

impl VerificationEvent {
    /// The identifier this event concerns.
    pub fn identifier(&self) -> &str {
        match self {
            VerificationEvent::Started { identifier }
            | VerificationEvent::RoutingGateway { identifier, .. }
            | VerificationEvent::ManifestLoaded { identifier, .. }
            | VerificationEvent::Progress { identifier, .. }
            | VerificationEvent::Complete { identifier, .. }
            | VerificationEvent::Failed { identifier, .. } => identifier,
        }
    }
}

/// Sink for verification progress events, implemented by the host surface.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: VerificationEvent);
}

/// Sink that drops every event. Default when no surface is attached.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: VerificationEvent) {}
}
