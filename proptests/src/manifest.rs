//! Wire-format properties for path manifests.

use crate::strategies::{content_id_strategy, manifest_strategy};
use common::PathManifest;
use proptest::prelude::*;

proptest! {
    /// Serialize -> parse is the identity for any well-formed manifest,
    /// regardless of which path-entry forms it mixes.
    #[test]
    fn prop_manifest_round_trips(manifest in manifest_strategy()) {
        let json = serde_json::to_vec(&manifest).unwrap();
        let back = PathManifest::parse(&json).unwrap();
        prop_assert_eq!(manifest, back);
    }

    /// Every serialized manifest passes the content-type-free sniff.
    #[test]
    fn prop_sniff_accepts_serialized_manifests(manifest in manifest_strategy()) {
        let json = serde_json::to_vec(&manifest).unwrap();
        prop_assert!(PathManifest::sniff(&json));
    }

    /// A declared index always references an entry that exists, so
    /// `index_path` never invents a path.
    #[test]
    fn prop_index_path_is_always_a_real_entry(manifest in manifest_strategy()) {
        if let Some(path) = manifest.index_path() {
            prop_assert!(manifest.paths.contains_key(path));
        }
    }

    /// `entries` yields exactly the paths map, with ids unwrapped from
    /// either wire form.
    #[test]
    fn prop_entries_match_paths(manifest in manifest_strategy()) {
        let collected: Vec<(String, String)> = manifest
            .entries()
            .map(|(p, id)| (p.to_string(), id.to_string()))
            .collect();
        prop_assert_eq!(collected.len(), manifest.paths.len());
        for (path, id) in collected {
            prop_assert_eq!(manifest.paths[&path].id(), id);
        }
    }

    /// Synthetic single-file manifests are self-referential and minimal.
    #[test]
    fn prop_single_file_manifest_shape(id in content_id_strategy()) {
        let manifest = PathManifest::single_file(&id);
        prop_assert_eq!(manifest.paths.len(), 1);
        prop_assert_eq!(manifest.index_path(), Some(id.as_str()));
        prop_assert_eq!(manifest.paths[&id].id(), id.as_str());
        prop_assert!(manifest.fallback_id().is_none());
    }
}
