//! AWS adapters for the patch engine's collaborator traits.
//!
//! | Trait | Service |
//! |---|---|
//! | [`PatchCatalog`](patchflow_core::clients::PatchCatalog) | DynamoDB catalog table |
//! | [`InstanceDirectory`](patchflow_core::clients::InstanceDirectory) | EC2 |
//! | [`RemoteExecutor`](patchflow_core::clients::RemoteExecutor) | SSM Run Command |
//! | [`ResultStore`](patchflow_core::clients::ResultStore) | DynamoDB history table |
//! | [`NotificationChannel`](patchflow_core::clients::NotificationChannel) | SNS |
//!
//! All clients are built from one [`SdkConfig`] loaded from the standard
//! credential and region chain; see [`AwsClients::load`].

pub mod catalog;
pub mod directory;
pub mod executor;
pub mod history;
pub mod notify;

pub use catalog::DynamoCatalog;
pub use directory::Ec2Directory;
pub use executor::SsmExecutor;
pub use history::DynamoHistoryStore;
pub use notify::SnsNotifier;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::error::DisplayErrorContext;
use patchflow_core::clients::ClientError;

/// Service clients sharing one SDK configuration.
#[derive(Clone)]
pub struct AwsClients {
    pub dynamodb: aws_sdk_dynamodb::Client,
    pub ec2: aws_sdk_ec2::Client,
    pub ssm: aws_sdk_ssm::Client,
    pub sns: aws_sdk_sns::Client,
}

impl AwsClients {
    /// Load SDK configuration from the environment and build every client.
    pub async fn load() -> Self {
        let sdk = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::from_sdk_config(&sdk)
    }

    pub fn from_sdk_config(sdk: &SdkConfig) -> Self {
        tracing::debug!(region = ?sdk.region(), "AWS clients configured");
        Self {
            dynamodb: aws_sdk_dynamodb::Client::new(sdk),
            ec2: aws_sdk_ec2::Client::new(sdk),
            ssm: aws_sdk_ssm::Client::new(sdk),
            sns: aws_sdk_sns::Client::new(sdk),
        }
    }
}

/// Convert an SDK error into a [`ClientError::Request`], keeping the full
/// source chain in the message.
pub(crate) fn request_error<E>(service: &'static str, err: E) -> ClientError
where
    E: std::error::Error,
{
    ClientError::request(service, DisplayErrorContext(err).to_string())
}
