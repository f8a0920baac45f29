//! Per-identifier verification state machine.
//!
//! One `VerificationRun` exists per identifier per attempt. Runs are owned
//! exclusively by the state machine: fetch/verify code never mutates a run
//! directly, it calls the guarded mutators here.
//!
//! # Generation guard
//!
//! `start` issues a strictly increasing `run_id` per identifier. Every
//! mutator compares its `run_id` argument against the run's current id and
//! silently no-ops on mismatch. This is how in-flight callbacks from a
//! superseded or retried run are neutralized without cancellation tokens;
//! do not "fix" it into true cancellation without re-checking every call
//! site.
//!
//! # Transitions
//!
//! Status moves only forward: resolving → fetching-manifest → verifying →
//! {complete | partial | failed}. A terminal run never changes again.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{Result, VerifyError};
use common::{EventSink, PathManifest, VerificationEvent, now_secs};

/// Synthetic path under which a manifest's fallback entry is verified.
pub const FALLBACK_PATH: &str = "<fallback>";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Resolving,
    FetchingManifest,
    Verifying,
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Complete | RunStatus::Partial | RunStatus::Failed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Resolving => "resolving",
            RunStatus::FetchingManifest => "fetching-manifest",
            RunStatus::Verifying => "verifying",
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One verification attempt for one identifier.
///
/// Callers receive clones; only the state machine mutates the stored run.
#[derive(Debug, Clone)]
pub struct VerificationRun {
    pub identifier: String,
    pub run_id: u64,
    pub content_id: Option<String>,
    pub status: RunStatus,
    pub manifest: Option<Arc<PathManifest>>,
    pub total_resources: usize,
    pub verified_count: usize,
    /// Distinct content ids that failed to verify.
    pub failed_ids: BTreeSet<String>,
    /// Paths that failed; completion accounting is per path so that two
    /// paths sharing one content id cannot stall the run.
    pub failed_paths: BTreeSet<String>,
    pub path_to_content_id: BTreeMap<String, String>,
    pub index_path: Option<String>,
    pub is_single_file: bool,
    pub routing_origin: Option<String>,
    pub error: Option<String>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
}

impl VerificationRun {
    fn new(identifier: &str, run_id: u64) -> Self {
        VerificationRun {
            identifier: identifier.to_string(),
            run_id,
            content_id: None,
            status: RunStatus::Resolving,
            manifest: None,
            total_resources: 0,
            verified_count: 0,
            failed_ids: BTreeSet::new(),
            failed_paths: BTreeSet::new(),
            path_to_content_id: BTreeMap::new(),
            index_path: None,
            is_single_file: false,
            routing_origin: None,
            error: None,
            started_at: now_secs(),
            completed_at: None,
        }
    }

    fn settled(&self) -> bool {
        self.verified_count + self.failed_paths.len() >= self.total_resources
    }
}

/// Run table plus the event sink runs publish through.
pub struct StateMachine {
    runs: DashMap<String, VerificationRun>,
    /// Highest run id ever issued per identifier. Survives `clear` so ids
    /// stay strictly increasing for the process lifetime.
    issued: DashMap<String, u64>,
    sink: Arc<dyn EventSink>,
}

impl StateMachine {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            runs: DashMap::new(),
            issued: DashMap::new(),
            sink,
        }
    }

    /// Begin a new run for `identifier`, superseding any run in flight.
    ///
    /// Returns the new run id; callbacks must carry it to every mutator.
    pub fn start(&self, identifier: &str) -> u64 {
        let mut issued = self.issued.entry(identifier.to_string()).or_insert(0);
        *issued += 1;
        let run_id = *issued;
        drop(issued);

        info!(identifier = %identifier, run_id, "Starting verification run");
        self.runs
            .insert(identifier.to_string(), VerificationRun::new(identifier, run_id));
        self.sink.publish(VerificationEvent::Started {
            identifier: identifier.to_string(),
        });
        run_id
    }

    /// Record the resolved content id and routing hint.
    pub fn set_resolved(
        &self,
        identifier: &str,
        run_id: u64,
        content_id: &str,
        routing_origin: Option<&str>,
    ) {
        let mut event = None;
        if let Some(mut run) = self.runs.get_mut(identifier) {
            if run.run_id != run_id || run.status != RunStatus::Resolving {
                return;
            }
            run.content_id = Some(content_id.to_string());
            run.routing_origin = routing_origin.map(|s| s.to_string());
            run.status = RunStatus::FetchingManifest;
            if let Some(origin) = routing_origin {
                event = Some(VerificationEvent::RoutingGateway {
                    identifier: identifier.to_string(),
                    origin: origin.to_string(),
                });
            }
        }
        if let Some(ev) = event {
            self.sink.publish(ev);
        }
    }

    /// Record the verified manifest and derive the work list from it.
    pub fn set_manifest_loaded(
        &self,
        identifier: &str,
        run_id: u64,
        manifest: Arc<PathManifest>,
        is_single_file: bool,
    ) {
        let mut event = None;
        if let Some(mut run) = self.runs.get_mut(identifier) {
            if run.run_id != run_id || run.status != RunStatus::FetchingManifest {
                return;
            }

            let mut paths: BTreeMap<String, String> = manifest
                .entries()
                .map(|(p, id)| (p.to_string(), id.to_string()))
                .collect();
            if let Some(fb) = manifest.fallback_id() {
                paths.insert(FALLBACK_PATH.to_string(), fb.to_string());
            }

            run.total_resources = paths.len();
            run.index_path = manifest.index_path().map(|s| s.to_string());
            run.path_to_content_id = paths;
            run.is_single_file = is_single_file;
            run.manifest = Some(manifest);
            run.status = RunStatus::Verifying;

            // A manifest with no paths has nothing left to verify
            if run.total_resources == 0 {
                run.status = RunStatus::Complete;
                run.completed_at = Some(now_secs());
            }

            event = Some(VerificationEvent::ManifestLoaded {
                identifier: identifier.to_string(),
                content_id: run.content_id.clone().unwrap_or_default(),
                total: run.total_resources,
            });
            debug!(
                identifier = %identifier,
                run_id,
                resources = run.total_resources,
                single_file = is_single_file,
                "Manifest loaded"
            );
        }
        if let Some(ev) = event {
            self.sink.publish(ev);
        }
    }

    /// Record one resource verified. Triggers completion when the run settles.
    pub fn record_verified(&self, identifier: &str, run_id: u64, content_id: &str, path: &str) {
        self.record_outcome(identifier, run_id, content_id, path, None);
    }

    /// Record one resource failed. Never propagates; the run can still end
    /// partial.
    pub fn record_failed(
        &self,
        identifier: &str,
        run_id: u64,
        content_id: &str,
        path: &str,
        error: &str,
    ) {
        self.record_outcome(identifier, run_id, content_id, path, Some(error));
    }

    fn record_outcome(
        &self,
        identifier: &str,
        run_id: u64,
        content_id: &str,
        path: &str,
        error: Option<&str>,
    ) {
        let mut events: Vec<VerificationEvent> = Vec::new();
        if let Some(mut run) = self.runs.get_mut(identifier) {
            if run.run_id != run_id || run.status != RunStatus::Verifying {
                return;
            }

            match error {
                None => run.verified_count += 1,
                Some(reason) => {
                    debug!(
                        identifier = %identifier,
                        content_id = %content_id,
                        path = %path,
                        reason = %reason,
                        "Resource failed verification"
                    );
                    run.failed_ids.insert(content_id.to_string());
                    run.failed_paths.insert(path.to_string());
                }
            }

            events.push(VerificationEvent::Progress {
                identifier: identifier.to_string(),
                content_id: Some(content_id.to_string()),
                current: run.verified_count + run.failed_paths.len(),
                total: run.total_resources,
            });

            if run.settled() {
                let now = now_secs();
                run.completed_at = Some(now);
                if run.failed_paths.is_empty() {
                    run.status = RunStatus::Complete;
                } else if run.verified_count > 0 {
                    run.status = RunStatus::Partial;
                } else {
                    run.status = RunStatus::Failed;
                    run.error = Some(format!(
                        "all {} resources failed verification",
                        run.total_resources
                    ));
                }
                info!(
                    identifier = %identifier,
                    run_id,
                    status = %run.status,
                    verified = run.verified_count,
                    failed = run.failed_paths.len(),
                    "Verification run settled"
                );
                events.push(match run.status {
                    RunStatus::Failed => VerificationEvent::Failed {
                        identifier: identifier.to_string(),
                        error: run.error.clone().unwrap_or_default(),
                    },
                    _ => VerificationEvent::Complete {
                        identifier: identifier.to_string(),
                        content_id: run.content_id.clone(),
                        verified: run.verified_count,
                        failed: run.failed_paths.len(),
                    },
                });
            }
        }
        for ev in events {
            self.sink.publish(ev);
        }
    }

    /// Fail the whole run: manifest-level errors, resolution errors.
    pub fn fail(&self, identifier: &str, run_id: u64, err: &VerifyError) {
        let mut event = None;
        if let Some(mut run) = self.runs.get_mut(identifier) {
            if run.run_id != run_id || run.status.is_terminal() {
                return;
            }
            run.status = RunStatus::Failed;
            run.error = Some(err.to_string());
            run.completed_at = Some(now_secs());
            error!(identifier = %identifier, run_id, error = %err, "Verification run failed");
            event = Some(VerificationEvent::Failed {
                identifier: identifier.to_string(),
                error: err.to_string(),
            });
        }
        if let Some(ev) = event {
            self.sink.publish(ev);
        }
    }

    /// Read-only snapshot of the current run for `identifier`.
    pub fn get_state(&self, identifier: &str) -> Option<VerificationRun> {
        self.runs.get(identifier).map(|r| r.clone())
    }

    /// Current run id for `identifier`, if a run exists.
    pub fn current_run_id(&self, identifier: &str) -> Option<u64> {
        self.runs.get(identifier).map(|r| r.run_id)
    }

    /// Run finished with at least one verified resource.
    pub fn is_complete(&self, identifier: &str) -> bool {
        self.runs
            .get(identifier)
            .map(|r| matches!(r.status, RunStatus::Complete | RunStatus::Partial))
            .unwrap_or(false)
    }

    pub fn is_in_progress(&self, identifier: &str) -> bool {
        self.runs
            .get(identifier)
            .map(|r| !r.status.is_terminal())
            .unwrap_or(false)
    }

    /// Forget the run for `identifier`. Run ids remain monotonic.
    pub fn clear(&self, identifier: &str) {
        self.runs.remove(identifier);
    }

    /// Number of runs currently tracked.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Block until the identifier's run reaches a terminal state.
    ///
    /// For callers that did not start the run. Polling, bounded by
    /// `timeout`; expiry maps to `VerificationTimeout`.
    pub async fn wait_for_completion(
        &self,
        identifier: &str,
        timeout: Duration,
    ) -> Result<VerificationRun> {
        let poll = Duration::from_millis(50);
        let wait = async {
            loop {
                if let Some(run) = self.get_state(identifier)
                    && run.status.is_terminal()
                {
                    return run;
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| VerifyError::VerificationTimeout {
                identifier: identifier.to_string(),
            })
    }

    /// Drop terminal runs older than `retention`. Called by the background
    /// sweep to bound run-table memory.
    pub fn sweep(&self, retention: Duration) {
        let now = now_secs();
        if now == 0 {
            return;
        }
        let cutoff = now.saturating_sub(retention.as_secs());
        self.runs.retain(|_, run| match run.completed_at {
            Some(done) if run.status.is_terminal() => done > cutoff,
            _ => true,
        });
    }
}
