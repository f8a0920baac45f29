//! Path manifest wire format.
//!
//! A manifest is a JSON document mapping logical paths to content ids,
//! analogous to a static site's file listing. The format must round-trip
//! exactly: some origins re-serve manifests byte-for-byte and re-serialize
//! drift would break digest verification downstream.
//!
//! Path entries appear in two forms in the wild and both are accepted:
//!
//! ```json
//! "paths": {
//!   "index.html": { "id": "cG9zdGVyaXR5..." },
//!   "app.js": "cG9zdGVyaXR5..."
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content type a well-behaved origin sets when serving a manifest.
pub const MANIFEST_CONTENT_TYPE: &str = "application/x.arweave-manifest+json";

/// Schema marker carried in the `manifest` field.
pub const MANIFEST_MARKER: &str = "arweave/paths";

/// One path entry: either a bare id string or an object with an `id` field.
///
/// Untagged so that each form serializes back to exactly what was parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestTarget {
    Entry { id: String },
    Id(String),
}

impl ManifestTarget {
    /// The content id this entry points at, whichever form it came in.
    pub fn id(&self) -> &str {
        match self {
            ManifestTarget::Entry { id } => id,
            ManifestTarget::Id(id) => id,
        }
    }
}

/// The manifest index: which path to serve for the bare identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub path: String,
}

/// A parsed path manifest.
///
/// Immutable once parsed and verified; the engine never mutates one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathManifest {
    /// Schema marker, `arweave/paths` for every version seen so far.
    pub manifest: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<ManifestIndex>,
    pub paths: BTreeMap<String, ManifestTarget>,
    /// Content served for paths absent from `paths`, if the site opted in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ManifestTarget>,
}

impl PathManifest {
    /// Parse manifest JSON, checking the schema marker.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let parsed: PathManifest =
            serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if parsed.manifest != MANIFEST_MARKER {
            return Err(format!(
                "unrecognized manifest marker '{}'",
                parsed.manifest
            ));
        }
        Ok(parsed)
    }

    /// Best-effort sniff: does this byte blob look like a manifest?
    ///
    /// Origins do not always set the manifest content type, so callers fall
    /// back to this when the header is absent or generic.
    pub fn sniff(bytes: &[u8]) -> bool {
        // Cheap rejection before the full parse; the marker must appear
        // verbatim somewhere in a real manifest.
        if bytes.len() > 4 * 1024 * 1024 {
            return false;
        }
        let Ok(text) = std::str::from_utf8(bytes) else {
            return false;
        };
        if !text.contains(MANIFEST_MARKER) {
            return false;
        }
        Self::parse(bytes).is_ok()
    }

    /// Iterate `(path, content_id)` pairs in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.paths.iter().map(|(p, t)| (p.as_str(), t.id()))
    }

    /// The index path, when one is declared and present in `paths`.
    pub fn index_path(&self) -> Option<&str> {
        let path = self.index.as_ref()?.path.as_str();
        self.paths.contains_key(path).then_some(path)
    }

    /// Content id of the fallback entry, if any.
    pub fn fallback_id(&self) -> Option<&str> {
        self.fallback.as_ref().map(|t| t.id())
    }

    /// Build a synthetic one-entry manifest for a single-file identifier.
    ///
    /// The index points at the only path, which maps to the content itself.
    pub fn single_file(content_id: &str) -> Self {
        let mut paths = BTreeMap::new();
        paths.insert(
            content_id.to_string(),
            ManifestTarget::Entry {
                id: content_id.to_string(),
            },
        );
        PathManifest {
            manifest: MANIFEST_MARKER.to_string(),
            version: "0.2.0".to_string(),
            index: Some(ManifestIndex {
                path: content_id.to_string(),
            }),
            paths,
            fallback: None,
        }
    }
}
