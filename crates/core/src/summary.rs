//! Run summary published at the end of an orchestration run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::MachineHistoryRecord;
use crate::job::JobState;
use crate::os::OsKey;
use crate::types::{MachineId, Timestamp};

/// Per-OS job counters.
///
/// `failed` includes dispatch errors; `dispatch_errors` breaks them out.
/// `timed_out` includes pairs the remote service never acknowledged;
/// `not_dispatched` breaks them out and they are not counted as `dispatched`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsCounts {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub dispatch_errors: usize,
    pub not_dispatched: usize,
}

impl OsCounts {
    fn count(&mut self, record: &MachineHistoryRecord) {
        if record.state == JobState::TimedOut && record.job_id.is_none() {
            self.not_dispatched += 1;
        } else {
            self.dispatched += 1;
        }
        match record.state {
            JobState::Succeeded => self.succeeded += 1,
            JobState::Failed => self.failed += 1,
            JobState::TimedOut => self.timed_out += 1,
            JobState::DispatchError => {
                self.failed += 1;
                self.dispatch_errors += 1;
            }
            // Only terminal jobs reach the summary.
            JobState::Created | JobState::Sent | JobState::Polling => {}
        }
    }
}

/// Why an OS group produced no jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoPatches,
    NoMachines,
    /// The run ended before the group was resolved.
    Interrupted,
}

/// Aggregate outcome of one run. Built fresh each run and only published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub timestamp: Timestamp,
    pub per_os: BTreeMap<OsKey, OsCounts>,
    pub skipped: BTreeMap<OsKey, SkipReason>,
    pub per_machine: BTreeMap<MachineId, Vec<MachineHistoryRecord>>,
    /// History records that could not be written to the result store.
    pub store_write_failures: usize,
    /// Non-fatal problems met while resolving OS groups.
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, timestamp: Timestamp) -> Self {
        Self {
            run_id,
            timestamp,
            per_os: BTreeMap::new(),
            skipped: BTreeMap::new(),
            per_machine: BTreeMap::new(),
            store_write_failures: 0,
            warnings: Vec::new(),
        }
    }

    /// Ensure an OS group appears in `per_os`, even with zero jobs.
    pub fn register_os(&mut self, os: &OsKey) {
        self.per_os.entry(os.clone()).or_default();
    }

    pub fn skip(&mut self, os: &OsKey, reason: SkipReason) {
        self.register_os(os);
        self.skipped.insert(os.clone(), reason);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Count a written (or attempted) history record.
    pub fn add_record(&mut self, record: MachineHistoryRecord, persisted: bool) {
        self.per_os
            .entry(record.os.clone())
            .or_default()
            .count(&record);
        if !persisted {
            self.store_write_failures += 1;
        }
        let records = self.per_machine.entry(record.machine_id.clone()).or_default();
        records.push(record);
        records.sort_by_key(|r| r.timestamp);
    }

    /// Counters summed over every OS group.
    pub fn totals(&self) -> OsCounts {
        self.per_os.values().fold(OsCounts::default(), |mut acc, c| {
            acc.dispatched += c.dispatched;
            acc.succeeded += c.succeeded;
            acc.failed += c.failed;
            acc.timed_out += c.timed_out;
            acc.dispatch_errors += c.dispatch_errors;
            acc.not_dispatched += c.not_dispatched;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::job::PatchJob;
    use crate::kb::KbId;

    fn record(os: &str, machine: &str, state: JobState) -> MachineHistoryRecord {
        let mut job = PatchJob::new(OsKey::parse(os).unwrap(), machine, KbId::parse("KB1").unwrap());
        match state {
            JobState::DispatchError => job.mark_dispatch_error("boom").unwrap(),
            JobState::TimedOut => job.time_out("late").unwrap(),
            JobState::Succeeded | JobState::Failed => {
                job.mark_sent("cmd").unwrap();
                job.begin_polling().unwrap();
                job.finish(state == JobState::Succeeded, None).unwrap();
            }
            _ => {}
        }
        MachineHistoryRecord::from_job(&job, Utc::now())
    }

    #[test]
    fn counts_by_terminal_state() {
        let mut summary = RunSummary::new(Uuid::now_v7(), Utc::now());
        summary.add_record(record("W2019", "m1", JobState::Succeeded), true);
        summary.add_record(record("W2019", "m1", JobState::Failed), true);
        summary.add_record(record("W2019", "m2", JobState::TimedOut), true);
        summary.add_record(record("W2019", "m2", JobState::DispatchError), false);

        let counts = summary.per_os[&OsKey::parse("W2019").unwrap()];
        assert_eq!(
            counts,
            OsCounts {
                dispatched: 3,
                succeeded: 1,
                failed: 2,
                timed_out: 1,
                dispatch_errors: 1,
                not_dispatched: 1,
            }
        );
        assert_eq!(summary.store_write_failures, 1);
        assert_eq!(summary.per_machine["m1"].len(), 2);
        assert_eq!(summary.per_machine["m2"].len(), 2);
    }

    #[test]
    fn timeout_after_submission_counts_as_dispatched() {
        let mut job = PatchJob::new(OsKey::parse("W2019").unwrap(), "m1", KbId::parse("KB1").unwrap());
        job.mark_sent("cmd").unwrap();
        job.begin_polling().unwrap();
        job.time_out("no terminal status within 900s").unwrap();

        let mut summary = RunSummary::new(Uuid::now_v7(), Utc::now());
        summary.add_record(MachineHistoryRecord::from_job(&job, Utc::now()), true);
        summary.add_record(record("W2019", "m2", JobState::TimedOut), true);

        let totals = summary.totals();
        assert_eq!(totals.dispatched, 1);
        assert_eq!(totals.not_dispatched, 1);
        assert_eq!(totals.timed_out, 2);
    }

    #[test]
    fn skipped_os_is_listed_with_zero_counts() {
        let mut summary = RunSummary::new(Uuid::now_v7(), Utc::now());
        let os = OsKey::parse("W2022").unwrap();
        summary.skip(&os, SkipReason::NoPatches);
        assert_eq!(summary.per_os[&os], OsCounts::default());
        assert_eq!(summary.skipped[&os], SkipReason::NoPatches);
    }

    #[test]
    fn serializes_os_keys_as_strings() {
        let mut summary = RunSummary::new(Uuid::now_v7(), Utc::now());
        summary.register_os(&OsKey::parse("OS#W2019").unwrap());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["per_os"]["W2019"]["dispatched"], 0);
    }
}
