//! Result aggregation: history records and the run summary.

use std::sync::{Arc, Mutex};

use chrono::{SubsecRound, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use patchflow_core::clients::ResultStore;
use patchflow_core::types::Timestamp;
use patchflow_core::{MachineHistoryRecord, PatchJob, RunSummary};
use uuid::Uuid;

/// Maximum concurrent history writes in [`ResultAggregator::aggregate`].
const WRITE_CONCURRENCY: usize = 8;

// ---------------------------------------------------------------------------
// HistoryClock
// ---------------------------------------------------------------------------

/// Hands out strictly increasing timestamps with microsecond resolution.
///
/// Two records written in the same microsecond would collide on the history
/// sort key, so a repeated or earlier reading is bumped one microsecond past
/// the previous one.
#[derive(Debug, Default)]
pub struct HistoryClock {
    last: Mutex<Option<Timestamp>>,
}

impl HistoryClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Timestamp {
        self.next_after(Utc::now())
    }

    fn next_after(&self, reading: Timestamp) -> Timestamp {
        let reading = reading.trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last {
            Some(prev) if reading <= prev => prev + TimeDelta::microseconds(1),
            _ => reading,
        };
        *last = Some(next);
        next
    }
}

// ---------------------------------------------------------------------------
// ResultAggregator
// ---------------------------------------------------------------------------

/// A terminal job together with the history record written for it.
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub job: PatchJob,
    pub record: MachineHistoryRecord,
    /// Whether the result store accepted the record.
    pub persisted: bool,
}

/// Writes history records and builds the run summary.
#[derive(Clone)]
pub struct ResultAggregator {
    store: Arc<dyn ResultStore>,
    clock: Arc<HistoryClock>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            clock: Arc::new(HistoryClock::new()),
        }
    }

    /// Append one history record for a terminal job.
    ///
    /// A failed write is logged and reported through
    /// [`RecordedJob::persisted`]; it is never retried.
    pub async fn record(&self, job: &PatchJob) -> RecordedJob {
        if !job.is_terminal() {
            tracing::warn!(
                machine_id = %job.machine_id,
                kb = %job.kb,
                state = %job.state(),
                "Recording a job that is not terminal",
            );
        }

        let record = MachineHistoryRecord::from_job(job, self.clock.now());
        let persisted = match self.store.append(&record).await {
            Ok(()) => {
                tracing::debug!(
                    machine_id = %record.machine_id,
                    kb = %record.kb,
                    timestamp = %record.sort_key(),
                    "History record written",
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    machine_id = %record.machine_id,
                    kb = %record.kb,
                    job_id = ?record.job_id,
                    error = %e,
                    "Failed to write history record",
                );
                false
            }
        };

        RecordedJob {
            job: job.clone(),
            record,
            persisted,
        }
    }

    /// Record every job, then summarize.
    pub async fn aggregate(&self, run_id: Uuid, jobs: &[PatchJob]) -> RunSummary {
        let recorded: Vec<RecordedJob> = stream::iter(jobs)
            .map(|job| self.record(job))
            .buffer_unordered(WRITE_CONCURRENCY)
            .collect()
            .await;
        summarize(run_id, self.clock.now(), &recorded)
    }
}

/// Build a summary from already recorded jobs. Performs no I/O.
pub fn summarize(run_id: Uuid, timestamp: Timestamp, recorded: &[RecordedJob]) -> RunSummary {
    let mut summary = RunSummary::new(run_id, timestamp);
    for entry in recorded {
        summary.add_record(entry.record.clone(), entry.persisted);
    }
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use patchflow_core::clients::ClientError;
    use patchflow_core::{JobState, KbId, OsKey};

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        fail_machine: Option<String>,
        records: Mutex<Vec<MachineHistoryRecord>>,
    }

    #[async_trait]
    impl ResultStore for MemoryStore {
        async fn append(&self, record: &MachineHistoryRecord) -> Result<(), ClientError> {
            if self.fail_machine.as_deref() == Some(record.machine_id.as_str()) {
                return Err(ClientError::request("dynamodb", "ProvisionedThroughputExceeded"));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn terminal_job(machine: &str, kb: &str, succeeded: bool) -> PatchJob {
        let mut job = PatchJob::new(
            OsKey::parse("W2019").unwrap(),
            machine,
            KbId::parse(kb).unwrap(),
        );
        job.mark_sent(format!("cmd-{machine}-{kb}")).unwrap();
        job.begin_polling().unwrap();
        job.finish(succeeded, None).unwrap();
        job
    }

    // -- HistoryClock ---------------------------------------------------------

    #[test]
    fn clock_bumps_repeated_readings() {
        let clock = HistoryClock::new();
        let t = Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap();

        let a = clock.next_after(t);
        let b = clock.next_after(t);
        let c = clock.next_after(t - TimeDelta::seconds(1));

        assert_eq!(a, t);
        assert_eq!(b, t + TimeDelta::microseconds(1));
        assert_eq!(c, t + TimeDelta::microseconds(2));
    }

    #[test]
    fn clock_truncates_to_microseconds() {
        let clock = HistoryClock::new();
        let t = Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap() + TimeDelta::nanoseconds(1_500);
        assert_eq!(
            clock.next_after(t),
            Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap() + TimeDelta::microseconds(1)
        );
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = HistoryClock::new();
        let stamps: Vec<_> = (0..1000).map(|_| clock.now()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    // -- ResultAggregator -----------------------------------------------------

    #[tokio::test]
    async fn one_record_per_job_with_unique_keys() {
        let store = Arc::new(MemoryStore::default());
        let aggregator = ResultAggregator::new(store.clone());
        let jobs = vec![
            terminal_job("i-1", "KB1", true),
            terminal_job("i-1", "KB2", false),
            terminal_job("i-2", "KB1", true),
        ];

        let summary = aggregator.aggregate(Uuid::now_v7(), &jobs).await;

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        let mut keys: Vec<_> = records
            .iter()
            .map(|r| (r.machine_id.clone(), r.sort_key()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 3);

        let counts = summary.totals();
        assert_eq!(counts.dispatched, 3);
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(summary.store_write_failures, 0);
    }

    #[tokio::test]
    async fn write_failure_is_counted_not_fatal() {
        let store = Arc::new(MemoryStore {
            fail_machine: Some("i-2".into()),
            ..Default::default()
        });
        let aggregator = ResultAggregator::new(store.clone());
        let jobs = vec![terminal_job("i-1", "KB1", true), terminal_job("i-2", "KB1", true)];

        let summary = aggregator.aggregate(Uuid::now_v7(), &jobs).await;

        assert_eq!(store.records.lock().unwrap().len(), 1);
        assert_eq!(summary.store_write_failures, 1);
        assert_eq!(summary.totals().succeeded, 2);
        assert_eq!(summary.per_machine["i-2"][0].state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn summarize_is_deterministic() {
        let aggregator = ResultAggregator::new(Arc::new(MemoryStore::default()));
        let mut recorded = Vec::new();
        for job in [terminal_job("i-1", "KB1", true), terminal_job("i-2", "KB1", false)] {
            recorded.push(aggregator.record(&job).await);
        }

        let run_id = Uuid::now_v7();
        let ts = Utc::now();
        assert_eq!(summarize(run_id, ts, &recorded), summarize(run_id, ts, &recorded));
    }
}
