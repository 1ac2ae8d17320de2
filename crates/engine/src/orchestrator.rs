//! Run orchestration.
//!
//! One run takes a list of OS versions, fans out one task per
//! `(machine, kb)` pair over a bounded worker pool, and collects every
//! terminal job into a [`RunSummary`] that is published once. The run
//! never aborts after input validation: resolution failures become skipped
//! groups or warnings, and job failures become terminal job states.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use patchflow_core::clients::{
    InstanceDirectory, NotificationChannel, PatchCatalog, RemoteExecutor, ResultStore,
};
use patchflow_core::script::ScriptTemplate;
use patchflow_core::{KbId, OsKey, PatchJob, RunSummary, SkipReason};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use validator::Validate;

use crate::aggregator::{self, RecordedJob, ResultAggregator};
use crate::dispatcher::{JobDispatcher, DEFAULT_EXECUTION_TIMEOUT};
use crate::error::OrchestrationError;
use crate::notifier::SummaryNotifier;
use crate::poller::{PollConfig, StatusPoller};
use crate::resolver::{PatchResolver, TargetResolver};

/// Default number of pairs processed at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;

/// Default wall-clock bound on one run.
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(60 * 60);

const UNDISPATCHED_REASON: &str = "run deadline reached before dispatch";
const DISPATCH_INTERRUPTED_REASON: &str = "run deadline reached during dispatch";

// ---------------------------------------------------------------------------
// Request / config
// ---------------------------------------------------------------------------

/// Input of one run.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RunRequest {
    #[validate(length(min = 1, message = "At least one OS version is required"))]
    pub os_versions: Vec<String>,
}

impl RunRequest {
    pub fn new<I, S>(os_versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            os_versions: os_versions.into_iter().map(Into::into).collect(),
        }
    }

    /// Canonical OS keys in request order, duplicates removed.
    pub fn os_keys(&self) -> Result<Vec<OsKey>, OrchestrationError> {
        self.validate()?;
        let mut seen = BTreeSet::new();
        let mut keys = Vec::with_capacity(self.os_versions.len());
        for raw in &self.os_versions {
            let key = OsKey::parse(raw)?;
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// External services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn PatchCatalog>,
    pub directory: Arc<dyn InstanceDirectory>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub store: Arc<dyn ResultStore>,
    pub notifier: Arc<dyn NotificationChannel>,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pairs dispatched and polled at the same time. Zero is treated as one.
    pub max_concurrent_jobs: usize,
    /// Bound passed to the remote execution service for each script.
    pub execution_timeout: Duration,
    pub poll: PollConfig,
    /// Wall-clock bound on one run.
    pub run_deadline: Duration,
    pub template: ScriptTemplate,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            poll: PollConfig::default(),
            run_deadline: DEFAULT_RUN_DEADLINE,
            template: ScriptTemplate::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every pair reached a terminal state on its own.
    Completed,
    /// The run deadline fired; unfinished pairs were timed out.
    DeadlineExceeded,
    /// The caller cancelled the run; unfinished pairs were timed out.
    Cancelled,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub summary: RunSummary,
    /// Terminal jobs ordered by OS, machine and KB.
    pub jobs: Vec<PatchJob>,
    /// Set when the summary could not be published.
    pub notification_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    patches: PatchResolver,
    targets: TargetResolver,
    dispatcher: JobDispatcher,
    poller: StatusPoller,
    aggregator: ResultAggregator,
    notifier: SummaryNotifier,
    max_concurrent_jobs: usize,
    run_deadline: Duration,
}

/// Outcome of resolving the requested OS groups, before any job runs.
#[derive(Default)]
struct Resolved {
    skipped: Vec<(OsKey, SkipReason)>,
    warnings: Vec<String>,
    pairs: usize,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            patches: PatchResolver::new(collaborators.catalog),
            targets: TargetResolver::new(collaborators.directory),
            dispatcher: JobDispatcher::new(
                collaborators.executor.clone(),
                config.template,
                config.execution_timeout,
            ),
            poller: StatusPoller::new(collaborators.executor, config.poll),
            aggregator: ResultAggregator::new(collaborators.store),
            notifier: SummaryNotifier::new(collaborators.notifier),
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            run_deadline: config.run_deadline,
        }
    }

    /// Execute one run.
    ///
    /// Only invalid input is returned as an error, and it is detected before
    /// anything is dispatched. Cancelling `cancel` times out every pair that
    /// has not finished yet; the run still records and publishes.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, OrchestrationError> {
        let os_keys = request.os_keys()?;
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("patch_run", run_id = %run_id);
        Ok(self.execute(run_id, os_keys, cancel).instrument(span).await)
    }

    async fn execute(
        &self,
        run_id: Uuid,
        os_keys: Vec<OsKey>,
        parent: CancellationToken,
    ) -> RunReport {
        tracing::info!(
            os_groups = os_keys.len(),
            max_concurrent_jobs = self.max_concurrent_jobs,
            "Patch run started",
        );

        let cancel = parent.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let timer = tokio::spawn(run_deadline_timer(
            self.run_deadline,
            cancel.clone(),
            deadline_hit.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let (tx, mut rx) = mpsc::channel::<RecordedJob>(self.max_concurrent_jobs * 4);
        let mut tasks = JoinSet::new();
        let mut resolved = Resolved::default();

        for os in &os_keys {
            let resolve = async { tokio::join!(self.patches.resolve(os), self.targets.resolve(os)) };
            let resolution = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                both = resolve => Some(both),
            };
            let Some((kbs, machines)) = resolution else {
                tracing::warn!(os = %os, "Run ended before OS group was resolved");
                resolved.skipped.push((os.clone(), SkipReason::Interrupted));
                continue;
            };
            resolved.warnings.extend(kbs.warning);
            resolved.warnings.extend(machines.warning);

            if kbs.items.is_empty() {
                tracing::info!(os = %os, "No patches for OS, skipping");
                resolved.skipped.push((os.clone(), SkipReason::NoPatches));
                continue;
            }
            if machines.items.is_empty() {
                tracing::info!(os = %os, "No running machines for OS, skipping");
                resolved.skipped.push((os.clone(), SkipReason::NoMachines));
                continue;
            }

            for machine_id in &machines.items {
                for kb in &kbs.items {
                    resolved.pairs += 1;
                    let pair = PairTask {
                        os: os.clone(),
                        machine_id: machine_id.clone(),
                        kb: kb.clone(),
                        dispatcher: self.dispatcher.clone(),
                        poller: self.poller.clone(),
                        aggregator: self.aggregator.clone(),
                        semaphore: semaphore.clone(),
                        cancel: cancel.clone(),
                        tx: tx.clone(),
                    };
                    tasks.spawn(pair.run().in_current_span());
                }
            }
        }
        drop(tx);

        tracing::info!(pairs = resolved.pairs, "All pairs scheduled");

        let mut recorded = Vec::with_capacity(resolved.pairs);
        while let Some(entry) = rx.recv().await {
            recorded.push(entry);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Patch task failed to complete");
            }
        }
        timer.abort();

        let status = if parent.is_cancelled() {
            RunStatus::Cancelled
        } else if deadline_hit.load(Ordering::SeqCst) {
            RunStatus::DeadlineExceeded
        } else {
            RunStatus::Completed
        };

        recorded.sort_by(|a, b| {
            (&a.job.os, &a.job.machine_id, &a.job.kb).cmp(&(&b.job.os, &b.job.machine_id, &b.job.kb))
        });
        let mut summary = aggregator::summarize(run_id, Utc::now(), &recorded);
        for os in &os_keys {
            summary.register_os(os);
        }
        for (os, reason) in &resolved.skipped {
            summary.skip(os, *reason);
        }
        for warning in resolved.warnings {
            summary.warn(warning);
        }

        let totals = summary.totals();
        tracing::info!(
            status = ?status,
            dispatched = totals.dispatched,
            succeeded = totals.succeeded,
            failed = totals.failed,
            timed_out = totals.timed_out,
            store_write_failures = summary.store_write_failures,
            "Patch run finished",
        );

        let notification_error = self
            .notifier
            .publish(&summary)
            .await
            .err()
            .map(|e| e.to_string());

        RunReport {
            run_id,
            status,
            summary,
            jobs: recorded.into_iter().map(|entry| entry.job).collect(),
            notification_error,
        }
    }
}

async fn run_deadline_timer(deadline: Duration, cancel: CancellationToken, hit: Arc<AtomicBool>) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(deadline) => {
            tracing::warn!(deadline_secs = deadline.as_secs(), "Run deadline reached");
            hit.store(true, Ordering::SeqCst);
            cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Per-pair task
// ---------------------------------------------------------------------------

struct PairTask {
    os: OsKey,
    machine_id: String,
    kb: KbId,
    dispatcher: JobDispatcher,
    poller: StatusPoller,
    aggregator: ResultAggregator,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tx: mpsc::Sender<RecordedJob>,
}

impl PairTask {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };

        let job = if permit.is_some() && !self.cancel.is_cancelled() {
            let dispatched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                job = self.dispatcher.dispatch(&self.os, &self.machine_id, &self.kb) => Some(job),
            };
            match dispatched {
                Some(job) => self.poller.poll(job, &self.cancel).await,
                None => self.unsent(DISPATCH_INTERRUPTED_REASON),
            }
        } else {
            self.unsent(UNDISPATCHED_REASON)
        };

        let recorded = self.aggregator.record(&job).await;
        drop(permit);

        if self.tx.send(recorded).await.is_err() {
            tracing::error!(
                machine_id = %self.machine_id,
                kb = %self.kb,
                "Result collector closed before job was reported",
            );
        }
    }

    /// A timed-out job for a pair the remote service never acknowledged.
    fn unsent(&self, reason: &str) -> PatchJob {
        let mut job = PatchJob::new(self.os.clone(), self.machine_id.clone(), self.kb.clone());
        tracing::warn!(
            machine_id = %self.machine_id,
            kb = %self.kb,
            reason,
            "Pair not dispatched before run deadline",
        );
        if let Err(e) = job.time_out(reason) {
            tracing::error!(machine_id = %self.machine_id, error = %e, "Timeout transition rejected");
        }
        job
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
