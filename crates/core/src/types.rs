/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier assigned to a remote job by the execution service.
pub type RemoteJobId = String;

/// Identifier of a managed machine (e.g. an EC2 instance id).
pub type MachineId = String;
