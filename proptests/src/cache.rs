//! Cache invariants under arbitrary workloads.

use crate::strategies::distinct_ids;
use bytes::Bytes;
use proptest::prelude::*;
use std::collections::HashMap;
use verifier::ResourceCache;
use verifier::cache::resource_from_parts;

const CAP: u64 = 10_000;

fn resource(id: &str, size: u64) -> verifier::VerifiedResource {
    resource_from_parts(
        id,
        "application/octet-stream",
        Bytes::from(vec![0u8; size as usize]),
        HashMap::new(),
    )
}

/// One cache operation drawn from an arbitrary workload.
#[derive(Debug, Clone)]
enum Op {
    Set { id_index: usize, size: u64 },
    Get { id_index: usize },
    ClearFor { id_index: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..40usize, 1..=CAP * 2).prop_map(|(id_index, size)| Op::Set { id_index, size }),
        (0..40usize).prop_map(|id_index| Op::Get { id_index }),
        (0..40usize).prop_map(|id_index| Op::ClearFor { id_index }),
    ]
}

proptest! {
    /// Total bytes never exceed the cap at any point in any workload, and
    /// the running total always equals the sum of the entries present.
    #[test]
    fn prop_cache_never_exceeds_cap(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let cache = ResourceCache::new(CAP);
        let ids = distinct_ids(40);
        let mut shadow: HashMap<String, u64> = HashMap::new();

        for op in ops {
            match op {
                Op::Set { id_index, size } => {
                    let id = &ids[id_index];
                    let accepted = cache.set(resource(id, size));
                    prop_assert_eq!(accepted, size <= CAP);
                    if accepted {
                        shadow.insert(id.clone(), size);
                        // Shadow may now exceed cap; the cache evicts, the
                        // shadow only tracks what could still be present
                    }
                }
                Op::Get { id_index } => {
                    let id = &ids[id_index];
                    let hit = cache.get(id);
                    if let Some(r) = hit {
                        prop_assert_eq!(Some(&r.size), shadow.get(id));
                    }
                }
                Op::ClearFor { id_index } => {
                    let id = ids[id_index].clone();
                    cache.clear_for(&[id.clone()]);
                    shadow.remove(&id);
                    prop_assert!(!cache.has(&id));
                }
            }

            let stats = cache.stats();
            prop_assert!(stats.total_bytes <= CAP, "total {} over cap", stats.total_bytes);
        }
    }

    /// Filling the cache with fixed-size entries keeps exactly the most
    /// recent ones: eviction follows access order, oldest first.
    #[test]
    fn prop_eviction_drops_oldest_first(extra in 1..30usize) {
        let per_entry = CAP / 4;
        let cache = ResourceCache::new(CAP);
        let ids = distinct_ids(4 + extra);

        for id in &ids {
            cache.set(resource(id, per_entry));
        }

        // Exactly the last four fit; everything older was evicted in order
        let stats = cache.stats();
        prop_assert_eq!(stats.count, 4);
        for id in &ids[ids.len() - 4..] {
            prop_assert!(cache.has(id));
        }
        for id in &ids[..ids.len() - 4] {
            prop_assert!(!cache.has(id));
        }
    }

    /// `get` refreshes recency: the touched entry survives a subsequent
    /// eviction round.
    #[test]
    fn prop_touched_entries_survive(touch in 0..4usize) {
        let per_entry = CAP / 4;
        let cache = ResourceCache::new(CAP);
        let ids = distinct_ids(5);

        for id in &ids[..4] {
            cache.set(resource(id, per_entry));
        }
        prop_assert!(cache.get(&ids[touch]).is_some());

        // Inserting a fifth entry evicts the oldest untouched one
        cache.set(resource(&ids[4], per_entry));
        prop_assert!(cache.has(&ids[touch]));
        prop_assert!(cache.has(&ids[4]));
        prop_assert_eq!(cache.stats().count, 4);
    }
}
