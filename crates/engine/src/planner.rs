//! Per-instance patch planning.
//!
//! Answers which KBs apply to a given list of instances, looked up through
//! each instance's OS tag. Nothing is dispatched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use patchflow_core::clients::InstanceDirectory;
use patchflow_core::{KbId, OsKey};
use serde::Serialize;

use crate::error::OrchestrationError;
use crate::resolver::PatchResolver;

/// KBs that apply to one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstancePlan {
    pub instance_id: String,
    pub os: OsKey,
    pub kbs: Vec<KbId>,
}

pub struct InstancePlanner {
    directory: Arc<dyn InstanceDirectory>,
    patches: PatchResolver,
}

impl InstancePlanner {
    pub fn new(directory: Arc<dyn InstanceDirectory>, patches: PatchResolver) -> Self {
        Self { directory, patches }
    }

    /// Plan every distinct instance in `instance_ids`.
    ///
    /// Unknown or untagged instances, and instances whose lookup fails, are
    /// left out of the result with a warning. Each OS is resolved once.
    pub async fn plan(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstancePlan>, OrchestrationError> {
        let ids: BTreeSet<&str> = instance_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "At least one instance id is required".to_string(),
            ));
        }

        let mut by_os: BTreeMap<OsKey, Vec<String>> = BTreeMap::new();
        for id in ids {
            let tag = match self.directory.os_tag(id).await {
                Ok(Some(tag)) => tag,
                Ok(None) => {
                    tracing::warn!(instance_id = id, "Instance not found or has no OS tag");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(instance_id = id, error = %e, "Failed to look up instance");
                    continue;
                }
            };
            match OsKey::parse(&tag) {
                Ok(os) => by_os.entry(os).or_default().push(id.to_string()),
                Err(e) => {
                    tracing::warn!(instance_id = id, os_tag = %tag, error = %e, "Invalid OS tag");
                }
            }
        }

        let mut plans = Vec::new();
        for (os, instances) in by_os {
            let kbs: Vec<KbId> = self.patches.resolve(&os).await.items.into_iter().collect();
            for instance_id in instances {
                plans.push(InstancePlan {
                    instance_id,
                    os: os.clone(),
                    kbs: kbs.clone(),
                });
            }
        }
        plans.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        tracing::info!(requested = instance_ids.len(), planned = plans.len(), "Instance plan built");
        Ok(plans)
    }
}
