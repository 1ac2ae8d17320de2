//! Patch job entity and its lifecycle state machine.
//!
//! A [`PatchJob`] is created per `(machine, kb)` pair and moves through
//! [`JobState`] until it reaches a terminal state. Transitions go through
//! the methods on [`PatchJob`], which reject anything
//! [`JobState::valid_transitions`] does not list.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::kb::KbId;
use crate::os::OsKey;
use crate::output::{self, ParsedOutput};
use crate::types::{MachineId, RemoteJobId};

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a patch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Sent,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    DispatchError,
}

impl JobState {
    /// States reachable from `self` in one step.
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(self) -> &'static [JobState] {
        match self {
            Self::Created => &[Self::Sent, Self::DispatchError, Self::TimedOut],
            Self::Sent => &[Self::Polling, Self::TimedOut],
            Self::Polling => &[Self::Succeeded, Self::Failed, Self::TimedOut],
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::DispatchError => &[],
        }
    }

    pub fn can_transition_to(self, to: JobState) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// No further transition occurs from a terminal state.
    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Sent => "Sent",
            Self::Polling => "Polling",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::DispatchError => "DispatchError",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RebootRequired
// ---------------------------------------------------------------------------

/// Whether the machine needs a reboot after the patch.
///
/// Serialized as `null`, `true` or `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum RebootRequired {
    #[default]
    Unknown,
    Yes,
    No,
}

impl RebootRequired {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Yes => Some(true),
            Self::No => Some(false),
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl From<Option<bool>> for RebootRequired {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Unknown,
            Some(true) => Self::Yes,
            Some(false) => Self::No,
        }
    }
}

impl From<RebootRequired> for Option<bool> {
    fn from(value: RebootRequired) -> Self {
        value.as_bool()
    }
}

// ---------------------------------------------------------------------------
// PatchJob
// ---------------------------------------------------------------------------

/// One remote patch execution for a `(machine, kb)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchJob {
    /// Assigned by the remote execution service once the job is sent.
    pub job_id: Option<RemoteJobId>,
    pub machine_id: MachineId,
    pub kb: KbId,
    pub os: OsKey,
    state: JobState,
    /// Command output, truncated to [`output::MAX_OUTPUT_LEN`] characters.
    pub output: String,
    pub reboot_required: RebootRequired,
    /// KB reported by the remote script, when its output was parsed.
    pub reported_kb: Option<String>,
    pub error: Option<String>,
}

impl PatchJob {
    /// A fresh job in the `Created` state.
    pub fn new(os: OsKey, machine_id: impl Into<MachineId>, kb: KbId) -> Self {
        Self {
            job_id: None,
            machine_id: machine_id.into(),
            kb,
            os,
            state: JobState::Created,
            output: String::new(),
            reboot_required: RebootRequired::Unknown,
            reported_kb: None,
            error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `Created -> Sent`, recording the remote job id.
    pub fn mark_sent(&mut self, job_id: impl Into<RemoteJobId>) -> Result<(), CoreError> {
        self.transition(JobState::Sent)?;
        self.job_id = Some(job_id.into());
        Ok(())
    }

    /// `Created -> DispatchError`, recording the submission failure.
    pub fn mark_dispatch_error(&mut self, message: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobState::DispatchError)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// `Sent -> Polling`.
    pub fn begin_polling(&mut self) -> Result<(), CoreError> {
        self.transition(JobState::Polling)
    }

    /// Store command output and whatever can be parsed from it.
    ///
    /// Parsing runs on the full text; only the truncated text is kept.
    /// A previously known reboot flag is never reset to unknown.
    pub fn record_output(&mut self, raw: &str) -> ParsedOutput {
        let parsed = output::parse_patch_output(raw);
        self.output = output::truncate_output(raw.trim());
        if parsed.reboot_required.is_known() {
            self.reboot_required = parsed.reboot_required;
        }
        if parsed.reported_kb.is_some() {
            self.reported_kb = parsed.reported_kb.clone();
        }
        parsed
    }

    /// `Polling -> Succeeded | Failed` from a remote terminal status.
    pub fn finish(&mut self, succeeded: bool, error: Option<String>) -> Result<(), CoreError> {
        let to = if succeeded {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.transition(to)?;
        if error.is_some() {
            self.error = error;
        }
        Ok(())
    }

    /// Any non-terminal state `-> TimedOut`.
    pub fn time_out(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobState::TimedOut)?;
        self.error = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: JobState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
