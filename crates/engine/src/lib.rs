//! Patch-job orchestration engine.
//!
//! Stages, leaf-first:
//!
//! - [`PatchResolver`] / [`TargetResolver`]: OS group to KBs and machines.
//! - [`JobDispatcher`]: one remote job per `(machine, kb)` pair.
//! - [`StatusPoller`]: bounded, cancellable polling to a terminal state.
//! - [`ResultAggregator`]: one write-once history record per job, and the
//!   run summary.
//! - [`SummaryNotifier`]: publishes the summary once per run.
//!
//! [`Orchestrator`] wires the stages together behind a worker pool and a
//! run deadline. [`InstancePlanner`] answers "which KBs apply to these
//! specific instances" without dispatching anything.

pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod planner;
pub mod poller;
pub mod resolver;

pub use aggregator::{HistoryClock, RecordedJob, ResultAggregator};
pub use dispatcher::JobDispatcher;
pub use error::{NotifyError, OrchestrationError};
pub use notifier::SummaryNotifier;
pub use orchestrator::{
    Collaborators, EngineConfig, Orchestrator, RunReport, RunRequest, RunStatus,
};
pub use planner::{InstancePlan, InstancePlanner};
pub use poller::{PollConfig, StatusPoller};
pub use resolver::{PatchResolver, Resolution, TargetResolver};
