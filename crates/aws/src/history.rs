//! DynamoDB patch history store.
//!
//! Table layout: partition key `InstanceId`, sort key `Patch timestamp`.
//! Writes are conditional so an existing record is never overwritten.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use patchflow_core::clients::{ClientError, ResultStore};
use patchflow_core::MachineHistoryRecord;

use crate::request_error;

const SERVICE: &str = "dynamodb";

pub const PARTITION_KEY: &str = "InstanceId";
pub const SORT_KEY: &str = "Patch timestamp";

pub struct DynamoHistoryStore {
    client: Client,
    table: String,
}

impl DynamoHistoryStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ResultStore for DynamoHistoryStore {
    async fn append(&self, record: &MachineHistoryRecord) -> Result<(), ClientError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record_item(record)))
            .condition_expression("attribute_not_exists(#pk)")
            .expression_attribute_names("#pk", PARTITION_KEY)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(ClientError::Conflict {
                    service: SERVICE,
                    message: format!(
                        "record {}/{} already exists",
                        record.machine_id,
                        record.sort_key()
                    ),
                })
            }
            Err(e) => Err(request_error(SERVICE, e)),
        }
    }
}

fn record_item(record: &MachineHistoryRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        (PARTITION_KEY.to_string(), AttributeValue::S(record.machine_id.clone())),
        (SORT_KEY.to_string(), AttributeValue::S(record.sort_key())),
        ("OS".to_string(), AttributeValue::S(record.os.to_string())),
        ("KB".to_string(), AttributeValue::S(record.kb.to_string())),
        ("Status".to_string(), AttributeValue::S(record.state.to_string())),
        (
            "RebootRequired".to_string(),
            match record.reboot_required.as_bool() {
                Some(flag) => AttributeValue::Bool(flag),
                None => AttributeValue::Null(true),
            },
        ),
        ("Output".to_string(), AttributeValue::S(record.output.clone())),
    ]);
    if let Some(job_id) = &record.job_id {
        item.insert("CommandId".to_string(), AttributeValue::S(job_id.clone()));
    }
    if let Some(error) = &record.error {
        item.insert("Error".to_string(), AttributeValue::S(error.clone()));
    }
    item
}
