//! Durable per-machine patch history.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::job::{JobState, PatchJob, RebootRequired};
use crate::kb::KbId;
use crate::os::OsKey;
use crate::types::{MachineId, RemoteJobId, Timestamp};

/// Write-once audit entry for one terminal job.
///
/// Partitioned by `machine_id`, ordered by `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineHistoryRecord {
    pub machine_id: MachineId,
    pub timestamp: Timestamp,
    pub job_id: Option<RemoteJobId>,
    pub os: OsKey,
    pub kb: KbId,
    pub state: JobState,
    pub reboot_required: RebootRequired,
    pub output: String,
    pub error: Option<String>,
}

impl MachineHistoryRecord {
    /// Snapshot a job at write time.
    pub fn from_job(job: &PatchJob, timestamp: Timestamp) -> Self {
        Self {
            machine_id: job.machine_id.clone(),
            timestamp,
            job_id: job.job_id.clone(),
            os: job.os.clone(),
            kb: job.kb.clone(),
            state: job.state(),
            reboot_required: job.reboot_required,
            output: job.output.clone(),
            error: job.error.clone(),
        }
    }

    /// Sort key string with microsecond resolution, e.g.
    /// `2026-10-16T08:30:00.123456Z`.
    pub fn sort_key(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}
