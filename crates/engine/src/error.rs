use patchflow_core::clients::ClientError;
use patchflow_core::CoreError;

/// Errors that abort a run before any dispatch happens.
///
/// Everything after input validation is converted into job states,
/// skipped OS groups, or counters instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<CoreError> for OrchestrationError {
    fn from(value: CoreError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<validator::ValidationErrors> for OrchestrationError {
    fn from(value: validator::ValidationErrors) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

/// Failure publishing the run summary.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to publish summary: {0}")]
    Publish(#[from] ClientError),
}
