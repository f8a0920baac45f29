//! Manifest-first content verification engine.
//!
//! Resolves a human-readable name or a raw content id to verified bytes,
//! guaranteeing that what is served was not tampered with or substituted by
//! any single untrusted gateway. This is the trust layer between an
//! adversarial content-delivery network and a renderer that will execute
//! what comes back.
//!
//! # Components
//!
//! - [`health`]: time-boxed blacklist of failing origins
//! - [`pool`]: ranked trusted/routing candidate pools over a KV-backed
//!   gateway registry
//! - [`resolver`]: name resolution requiring multi-gateway consensus
//! - [`selector`]: picks one working origin from a candidate list
//! - [`content`]: manifest-level fetch plus digest verification
//! - [`workers`]: bounded-concurrency fan-out over manifest resources
//! - [`cache`]: size-bounded LRU of verified resources
//! - [`state`]: per-identifier run state machine with generation-guarded
//!   mutators
//! - [`engine`]: wires the above together behind one struct
//!
//! # Injected seams
//!
//! The engine implements no transport, storage, or presentation of its
//! own: it consumes a [`fetch::FetchClient`], a [`kv::KvStore`], an event
//! sink, and a [`strategy::VerificationStrategy`]. Defaults backed by
//! reqwest and SHA-256 digest comparison ship in-crate.

pub mod cache;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod health;
pub mod kv;
pub mod pool;
pub mod resolver;
pub mod selector;
pub mod state;
pub mod strategy;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStats, ResourceCache, VerifiedResource};
pub use config::VerifierConfig;
pub use engine::{Engine, EngineStats};
pub use error::{Result, VerifyError};
pub use fetch::{FetchClient, FetchResponse, HttpFetchClient};
pub use health::GatewayHealth;
pub use kv::{KvStore, MemoryKv};
pub use pool::{GatewayEntry, GatewayPools};
pub use resolver::{ResolvedName, Resolver};
pub use state::{RunStatus, StateMachine, VerificationRun};
pub use strategy::{DigestStrategy, VerificationStrategy};
