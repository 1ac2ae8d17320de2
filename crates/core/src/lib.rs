//! Shared domain types for the patch orchestration engine.
//!
//! This crate has no I/O. It defines the entities that flow between the
//! engine stages, the validation applied where external data enters the
//! system, and the client traits that external collaborators implement.

pub mod clients;
pub mod error;
pub mod history;
pub mod job;
pub mod kb;
pub mod os;
pub mod output;
pub mod script;
pub mod summary;
pub mod types;

pub use error::CoreError;
pub use history::MachineHistoryRecord;
pub use job::{JobState, PatchJob, RebootRequired};
pub use kb::KbId;
pub use os::OsKey;
pub use summary::{OsCounts, RunSummary, SkipReason};
