//! Interfaces to the external collaborators of the engine.
//!
//! Each collaborator is an `async_trait` object passed into the component
//! that uses it, so production adapters (AWS, Postgres) and in-memory fakes
//! are interchangeable.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::history::MachineHistoryRecord;
use crate::os::OsKey;
use crate::types::{MachineId, RemoteJobId};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure talking to an external collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The request could not be completed (network, auth, throttling, ...).
    #[error("{service} request failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    /// The service answered with data that does not fit the expected shape.
    #[error("Malformed {service} response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    /// A conditional write found an existing item.
    #[error("{service} rejected a duplicate write: {message}")]
    Conflict {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn request(service: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            service,
            message: message.into(),
        }
    }

    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Patch catalog
// ---------------------------------------------------------------------------

/// A raw catalog row. The KB is optional because ingestion may have written
/// rows without one; the resolver skips those.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRow {
    pub kb: Option<String>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub release_date: Option<String>,
    pub ttl: Option<i64>,
}

#[async_trait]
pub trait PatchCatalog: Send + Sync {
    /// All rows stored under the OS partition.
    async fn list_by_os(&self, os: &OsKey) -> Result<Vec<CatalogRow>, ClientError>;
}

// ---------------------------------------------------------------------------
// Instance directory
// ---------------------------------------------------------------------------

/// A running machine as reported by the directory, with its raw OS tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInstance {
    pub id: MachineId,
    pub os_tag: Option<String>,
}

#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Machines currently in the running state. Other lifecycle states are
    /// never returned.
    async fn list_running(&self) -> Result<Vec<DirectoryInstance>, ClientError>;

    /// The OS tag of one machine; `Ok(None)` when the machine is unknown or
    /// untagged.
    async fn os_tag(&self, instance_id: &str) -> Result<Option<String>, ClientError>;
}

// ---------------------------------------------------------------------------
// Remote execution
// ---------------------------------------------------------------------------

/// Status of a remote invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RemoteStatus {
    Pending,
    InProgress,
    Delayed,
    Cancelling,
    Success,
    Failed,
    Cancelled,
    /// The execution timed out on the machine itself.
    TimedOut,
    /// A status string this engine does not know. Treated as in progress.
    Other(String),
}

impl RemoteStatus {
    /// Map the service's status name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Delayed" => Self::Delayed,
            "Cancelling" => Self::Cancelling,
            "Success" => Self::Success,
            "Failed" => Self::Failed,
            "Cancelled" => Self::Cancelled,
            "TimedOut" => Self::TimedOut,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// Snapshot of a remote invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationStatus {
    pub status: RemoteStatus,
    /// Standard output so far; may be empty.
    pub output: String,
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `script` on `machine_id`. Returns the remote job id.
    async fn submit(
        &self,
        machine_id: &str,
        script: &str,
        timeout: Duration,
    ) -> Result<RemoteJobId, ClientError>;

    async fn status(&self, job_id: &str, machine_id: &str)
        -> Result<InvocationStatus, ClientError>;
}

// ---------------------------------------------------------------------------
// Result store / notification
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append one record. Never updates an existing record.
    async fn append(&self, record: &MachineHistoryRecord) -> Result<(), ClientError>;
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Fire-and-forget publication.
    async fn publish(&self, subject: &str, message: &str) -> Result<(), ClientError>;
}
