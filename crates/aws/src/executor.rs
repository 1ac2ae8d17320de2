//! SSM Run Command executor.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ssm::Client;
use patchflow_core::clients::{ClientError, InvocationStatus, RemoteExecutor, RemoteStatus};
use patchflow_core::types::RemoteJobId;

use crate::request_error;

const SERVICE: &str = "ssm";

/// SSM document used to run the patch script.
pub const DOCUMENT_NAME: &str = "AWS-RunPowerShellScript";

/// Smallest `TimeoutSeconds` SendCommand accepts.
pub const MIN_TIMEOUT_SECONDS: u64 = 30;

/// Largest `TimeoutSeconds` SendCommand accepts (30 days).
pub const MAX_TIMEOUT_SECONDS: u64 = 2_592_000;

/// Clamp an execution timeout into the range SendCommand accepts.
pub fn timeout_seconds(timeout: Duration) -> i32 {
    let secs = timeout
        .as_secs()
        .clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

pub struct SsmExecutor {
    client: Client,
}

impl SsmExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteExecutor for SsmExecutor {
    async fn submit(
        &self,
        machine_id: &str,
        script: &str,
        timeout: Duration,
    ) -> Result<RemoteJobId, ClientError> {
        let timeout_secs = timeout_seconds(timeout);

        let response = self
            .client
            .send_command()
            .instance_ids(machine_id)
            .document_name(DOCUMENT_NAME)
            .parameters("commands", vec![script.to_string()])
            .parameters("executionTimeout", vec![timeout_secs.to_string()])
            .timeout_seconds(timeout_secs)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        response
            .command()
            .and_then(|c| c.command_id())
            .map(str::to_string)
            .ok_or_else(|| ClientError::malformed(SERVICE, "SendCommand returned no command id"))
    }

    async fn status(
        &self,
        job_id: &str,
        machine_id: &str,
    ) -> Result<InvocationStatus, ClientError> {
        let response = self
            .client
            .get_command_invocation()
            .command_id(job_id)
            .instance_id(machine_id)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        let status = response
            .status()
            .map(|s| RemoteStatus::from_name(s.as_str()))
            .ok_or_else(|| {
                ClientError::malformed(SERVICE, "GetCommandInvocation returned no status")
            })?;

        Ok(InvocationStatus {
            status,
            output: response
                .standard_output_content()
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_clamped_to_send_command_range() {
        assert_eq!(timeout_seconds(Duration::from_secs(10)), 30);
        assert_eq!(timeout_seconds(Duration::from_secs(600)), 600);
        assert_eq!(timeout_seconds(Duration::from_secs(90 * 24 * 3600)), 2_592_000);
    }
}
