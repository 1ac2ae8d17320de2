//! EC2 instance directory.

use async_trait::async_trait;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{Filter, Instance};
use aws_sdk_ec2::Client;
use patchflow_core::clients::{ClientError, DirectoryInstance, InstanceDirectory};

use crate::request_error;

const SERVICE: &str = "ec2";

/// Tag holding the OS key of an instance.
pub const OS_TAG_KEY: &str = "OS";

pub struct Ec2Directory {
    client: Client,
}

impl Ec2Directory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InstanceDirectory for Ec2Directory {
    async fn list_running(&self) -> Result<Vec<DirectoryInstance>, ClientError> {
        let mut pages = self
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .build(),
            )
            .into_paginator()
            .send();

        let mut instances = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| request_error(SERVICE, e))?;
            for reservation in page.reservations() {
                instances.extend(reservation.instances().iter().filter_map(to_directory_instance));
            }
        }

        tracing::debug!(instances = instances.len(), "Listed running instances");
        Ok(instances)
    }

    async fn os_tag(&self, instance_id: &str) -> Result<Option<String>, ClientError> {
        let response = match self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .and_then(|se| se.code())
                    .is_some_and(|code| code.starts_with("InvalidInstanceID"));
                if not_found {
                    return Ok(None);
                }
                return Err(request_error(SERVICE, e));
            }
        };

        Ok(response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find_map(os_tag_of))
    }
}

fn to_directory_instance(instance: &Instance) -> Option<DirectoryInstance> {
    let id = instance.instance_id()?;
    Some(DirectoryInstance {
        id: id.to_string(),
        os_tag: os_tag_of(instance),
    })
}

fn os_tag_of(instance: &Instance) -> Option<String> {
    instance
        .tags()
        .iter()
        .find(|tag| tag.key() == Some(OS_TAG_KEY))
        .and_then(|tag| tag.value())
        .map(str::to_string)
}
