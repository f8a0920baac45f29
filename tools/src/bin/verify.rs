//! Content verification CLI tool.
//!
//! Resolves an identifier (a name or a 43-character content id) through the
//! verification engine against real gateways and reports the outcome.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin verify -- ardrive \
//!     --gateway https://arweave.net \
//!     --gateway https://permagate.io
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{EventSink, VerificationEvent};
use verifier::{Engine, GatewayEntry, HttpFetchClient, MemoryKv, RunStatus, VerifierConfig};

#[derive(Parser, Debug)]
#[command(
    name = "verify",
    about = "Resolve and cryptographically verify a name or content id"
)]
struct Args {
    /// Name or 43-character content id to verify
    identifier: String,

    /// Gateway origin(s), highest trust first; repeatable
    #[arg(long = "gateway", env = "VERIFY_GATEWAYS", value_delimiter = ',',
          default_value = "https://arweave.net")]
    gateways: Vec<String>,

    /// Maximum concurrent resource fetches
    #[arg(long, default_value = "10")]
    concurrency: usize,

    /// Print each verified path
    #[arg(long, default_value = "false")]
    verbose_paths: bool,
}

/// Sink that logs progress events as they arrive.
struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: VerificationEvent) {
        match event {
            VerificationEvent::Started { identifier } => {
                info!(identifier = %identifier, "Verification started");
            }
            VerificationEvent::RoutingGateway { origin, .. } => {
                info!(origin = %origin, "Routing gateway selected");
            }
            VerificationEvent::ManifestLoaded { content_id, total, .. } => {
                info!(content_id = %content_id, resources = total, "Manifest loaded");
            }
            VerificationEvent::Progress { current, total, .. } => {
                info!(current, total, "Progress");
            }
            VerificationEvent::Complete { verified, failed, .. } => {
                info!(verified, failed, "Verification complete");
            }
            VerificationEvent::Failed { error, .. } => {
                info!(error = %error, "Verification failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.gateways.is_empty() {
        bail!("at least one --gateway is required");
    }

    let config = VerifierConfig {
        concurrency: args.concurrency,
        ..VerifierConfig::default()
    };
    let engine = Engine::new(
        config,
        Arc::new(HttpFetchClient::new()),
        Arc::new(MemoryKv::new()),
        Arc::new(LogSink),
    );

    // Listed order doubles as the trust ranking
    let registry: Vec<GatewayEntry> = args
        .gateways
        .iter()
        .enumerate()
        .map(|(i, origin)| GatewayEntry {
            origin: origin.trim_end_matches('/').to_string(),
            stake: (args.gateways.len() - i) as u64,
        })
        .collect();
    engine
        .set_gateway_registry(&registry)
        .await
        .context("failed to seed gateway registry")?;

    let run = engine
        .verify(&args.identifier)
        .await
        .with_context(|| format!("verification of '{}' failed", args.identifier))?;

    println!();
    println!("identifier:  {}", run.identifier);
    if let Some(cid) = &run.content_id {
        println!("content id:  {cid}");
    }
    println!("status:      {}", run.status);
    println!("resources:   {}/{} verified", run.verified_count, run.total_resources);
    if !run.failed_ids.is_empty() {
        println!("failed ids:");
        for id in &run.failed_ids {
            println!("  {id}");
        }
    }
    let stats = engine.stats();
    println!(
        "cache:       {} entries, {} bytes",
        stats.cache.count, stats.cache.total_bytes
    );

    if args.verbose_paths {
        println!("paths:");
        for (path, id) in &run.path_to_content_id {
            println!("  {path} -> {id}");
        }
    }

    match run.status {
        RunStatus::Complete => Ok(()),
        RunStatus::Partial => {
            bail!(
                "partial verification: {} of {} resources failed",
                run.failed_ids.len(),
                run.total_resources
            )
        }
        _ => bail!("verification did not complete: {}", run.status),
    }
}
