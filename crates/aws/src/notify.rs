//! SNS notification channel.

use async_trait::async_trait;
use aws_sdk_sns::Client;
use patchflow_core::clients::{ClientError, NotificationChannel};

use crate::request_error;

pub struct SnsNotifier {
    client: Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(client: Client, topic_arn: impl Into<String>) -> Self {
        Self {
            client,
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for SnsNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(subject)
            .message(message)
            .send()
            .await
            .map_err(|e| request_error("sns", e))?;

        tracing::debug!(
            topic_arn = %self.topic_arn,
            message_id = response.message_id().unwrap_or_default(),
            "SNS message published",
        );
        Ok(())
    }
}
