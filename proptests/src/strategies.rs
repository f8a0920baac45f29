//! Shared proptest strategies for property-based testing.
//!
//! Provides generators for content ids, logical paths, and whole path
//! manifests (mixing both path-entry wire forms).

use common::manifest::{ManifestIndex, ManifestTarget, PathManifest};
use proptest::prelude::*;

/// Generate a valid 43-character base64url content id.
pub fn content_id_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{43}"
}

/// Generate a plausible logical path ("index.html", "js/app.js", ...).
pub fn path_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,2}\\.[a-z]{2,4}"
}

/// Generate a path entry in either wire form.
pub fn target_strategy() -> impl Strategy<Value = ManifestTarget> {
    (content_id_strategy(), any::<bool>()).prop_map(|(id, object_form)| {
        if object_form {
            ManifestTarget::Entry { id }
        } else {
            ManifestTarget::Id(id)
        }
    })
}

/// Generate a whole manifest with 1-12 paths, optional index and fallback.
pub fn manifest_strategy() -> impl Strategy<Value = PathManifest> {
    (
        prop::collection::btree_map(path_strategy(), target_strategy(), 1..12),
        any::<bool>(),
        prop::option::of(target_strategy()),
    )
        .prop_map(|(paths, with_index, fallback)| {
            let index = if with_index {
                // Point the index at a real entry
                paths.keys().next().map(|path| ManifestIndex {
                    path: path.clone(),
                })
            } else {
                None
            };
            PathManifest {
                manifest: "arweave/paths".to_string(),
                version: "0.2.0".to_string(),
                index,
                paths,
                fallback,
            }
        })
}

/// Generate `(content_id, size)` pairs for cache workloads.
pub fn sized_entry_strategy(max_size: u64) -> impl Strategy<Value = (String, u64)> {
    (content_id_strategy(), 1..=max_size)
}

/// Collect distinct content ids keyed by their first characters.
pub fn distinct_ids(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let c = char::from(b'A' + (i % 26) as u8);
            let mut id = c.to_string().repeat(43);
            id.replace_range(0..3, &format!("{i:03}"));
            id
        })
        .collect()
}
