//! Injected persistent key-value collaborator.
//!
//! The host environment owns durable storage; the engine only needs an
//! opaque async map for the gateway registry and pool snapshots. No backend
//! is assumed.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// Opaque async key-value store, implemented by the host.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the requested keys; absent keys are simply missing from the map.
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>>;
    async fn set(&self, entries: HashMap<String, Value>) -> Result<()>;
    async fn remove(&self, keys: &[String]) -> Result<()>;
}

/// In-memory store, used by the CLI and tests.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Value>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(v) = self.entries.get(key) {
                out.insert(key.clone(), v.clone());
            }
        }
        Ok(out)
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        for (k, v) in entries {
            self.entries.insert(k, v);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }
}
