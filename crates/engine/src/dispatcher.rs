//! Job dispatcher.
//!
//! Renders the patch script for one `(machine, kb)` pair and submits it to
//! the remote execution service. Submission is attempted exactly once.

use std::sync::Arc;
use std::time::Duration;

use patchflow_core::clients::RemoteExecutor;
use patchflow_core::script::ScriptTemplate;
use patchflow_core::{KbId, OsKey, PatchJob};

/// Default bound on how long the remote script may run.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Submits patch scripts to the remote execution service.
#[derive(Clone)]
pub struct JobDispatcher {
    executor: Arc<dyn RemoteExecutor>,
    template: ScriptTemplate,
    execution_timeout: Duration,
}

impl JobDispatcher {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        template: ScriptTemplate,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            template,
            execution_timeout,
        }
    }

    /// Dispatch one pair.
    ///
    /// The returned job is `Sent` with the remote job id, or `DispatchError`
    /// with the submission failure message.
    pub async fn dispatch(&self, os: &OsKey, machine_id: &str, kb: &KbId) -> PatchJob {
        let mut job = PatchJob::new(os.clone(), machine_id, kb.clone());
        let script = self.template.render(kb);

        let outcome = match self
            .executor
            .submit(machine_id, &script, self.execution_timeout)
            .await
        {
            Ok(job_id) => {
                tracing::info!(
                    machine_id,
                    kb = %kb,
                    os = %os,
                    job_id = %job_id,
                    "Patch job sent",
                );
                job.mark_sent(job_id)
            }
            Err(e) => {
                tracing::error!(
                    machine_id,
                    kb = %kb,
                    os = %os,
                    error = %e,
                    "Failed to dispatch patch job",
                );
                job.mark_dispatch_error(e.to_string())
            }
        };

        // A fresh job is always in `Created`, so this only fires on a bug.
        if let Err(e) = outcome {
            tracing::error!(machine_id, kb = %kb, error = %e, "Dispatch transition rejected");
        }

        job
    }
}
