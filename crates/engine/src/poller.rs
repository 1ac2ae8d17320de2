//! Status polling for sent patch jobs.
//!
//! A [`StatusPoller`] queries the remote execution service with exponential
//! backoff until the job reaches a terminal remote status, the poll deadline
//! passes, or the run's [`CancellationToken`] fires. It never gives up early
//! on a transient query error; those are retried until the deadline.

use std::sync::Arc;
use std::time::Duration;

use patchflow_core::clients::{RemoteExecutor, RemoteStatus};
use patchflow_core::PatchJob;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the polling backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Delay before the second status query.
    pub initial_delay: Duration,
    /// Upper bound on the delay between queries.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each query.
    pub multiplier: f64,
    /// Total time a job may spend polling before it is timed out.
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            deadline: Duration::from_secs(15 * 60),
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`PollConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Drives one sent job to a terminal state.
#[derive(Clone)]
pub struct StatusPoller {
    executor: Arc<dyn RemoteExecutor>,
    config: PollConfig,
}

impl StatusPoller {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: PollConfig) -> Self {
        Self { executor, config }
    }

    fn deadline_reason(&self) -> String {
        format!("no terminal status within {}s", self.config.deadline.as_secs())
    }

    /// Poll `job` until it is terminal.
    ///
    /// Jobs that are not `Sent` are returned untouched. The returned job is
    /// always `Succeeded`, `Failed` or `TimedOut` otherwise.
    pub async fn poll(&self, mut job: PatchJob, cancel: &CancellationToken) -> PatchJob {
        if let Err(e) = job.begin_polling() {
            tracing::warn!(
                machine_id = %job.machine_id,
                kb = %job.kb,
                error = %e,
                "Job is not pollable",
            );
            return job;
        }

        let Some(job_id) = job.job_id.clone() else {
            expire(&mut job, "sent job has no remote job id".to_string());
            return job;
        };
        let machine_id = job.machine_id.clone();

        let deadline = Instant::now() + self.config.deadline;
        let mut delay = self.config.initial_delay;
        let mut attempt = 0u32;
        let mut last_error: Option<String> = None;
        let mut mismatch_logged = false;

        loop {
            attempt += 1;

            let query = tokio::time::timeout_at(deadline, self.executor.status(&job_id, &machine_id));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = query => Some(result),
            };
            let result = match result {
                None => {
                    expire(&mut job, with_last_error("run deadline reached while polling", &last_error));
                    return job;
                }
                Some(Err(_elapsed)) => {
                    tracing::warn!(
                        machine_id = %machine_id,
                        job_id = %job_id,
                        "Status query {attempt} did not return before the poll deadline",
                    );
                    expire(&mut job, with_last_error(&self.deadline_reason(), &last_error));
                    return job;
                }
                Some(Ok(result)) => result,
            };

            match result {
                Ok(invocation) => {
                    last_error = None;

                    if !invocation.output.trim().is_empty() {
                        let parsed = job.record_output(&invocation.output);
                        if let Some(reported) = parsed.reported_kb.as_deref() {
                            if !mismatch_logged && !job.kb.matches_reported(reported) {
                                tracing::warn!(
                                    machine_id = %machine_id,
                                    job_id = %job_id,
                                    kb = %job.kb,
                                    reported_kb = reported,
                                    "Remote output reports a different KB",
                                );
                                mismatch_logged = true;
                            }
                        }
                    }

                    if invocation.status.is_terminal() {
                        finish(&mut job, &invocation.status);
                        tracing::info!(
                            machine_id = %machine_id,
                            job_id = %job_id,
                            kb = %job.kb,
                            state = %job.state(),
                            reboot_required = ?job.reboot_required.as_bool(),
                            attempt,
                            "Patch job finished",
                        );
                        return job;
                    }

                    tracing::debug!(
                        machine_id = %machine_id,
                        job_id = %job_id,
                        status = ?invocation.status,
                        attempt,
                        "Patch job still running",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        machine_id = %machine_id,
                        job_id = %job_id,
                        error = %e,
                        "Status query {attempt} failed",
                    );
                    last_error = Some(e.to_string());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                expire(&mut job, with_last_error(&self.deadline_reason(), &last_error));
                return job;
            }

            let wake = (now + delay).min(deadline);
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep_until(wake) => false,
            };
            if cancelled {
                expire(&mut job, with_last_error("run deadline reached while polling", &last_error));
                return job;
            }

            delay = next_delay(delay, &self.config);
        }
    }
}

fn finish(job: &mut PatchJob, status: &RemoteStatus) {
    let outcome = match status {
        RemoteStatus::Success => job.finish(true, None),
        RemoteStatus::Failed => job.finish(false, Some("remote execution failed".to_string())),
        RemoteStatus::Cancelled => {
            job.finish(false, Some("remote execution was cancelled".to_string()))
        }
        RemoteStatus::TimedOut => job.finish(
            false,
            Some("remote execution timed out on the machine".to_string()),
        ),
        other => job.finish(false, Some(format!("unexpected remote status {other:?}"))),
    };
    if let Err(e) = outcome {
        tracing::error!(machine_id = %job.machine_id, error = %e, "Finish transition rejected");
    }
}

fn expire(job: &mut PatchJob, reason: String) {
    tracing::warn!(
        machine_id = %job.machine_id,
        job_id = ?job.job_id,
        kb = %job.kb,
        reason = %reason,
        "Patch job timed out",
    );
    if let Err(e) = job.time_out(reason) {
        tracing::error!(machine_id = %job.machine_id, error = %e, "Timeout transition rejected");
    }
}

fn with_last_error(reason: &str, last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!("{reason}; last error: {e}"),
        None => reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
