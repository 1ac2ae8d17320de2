//! OS group resolution: which KBs apply, and which machines run the OS.
//!
//! Both resolvers treat "nothing found" as an empty set, never an error.
//! A failed query is also reduced to an empty set, with the failure kept as
//! a warning so the run can report it.

use std::collections::BTreeSet;
use std::sync::Arc;

use patchflow_core::clients::{InstanceDirectory, PatchCatalog};
use patchflow_core::types::MachineId;
use patchflow_core::{KbId, OsKey};

/// Result of resolving one OS group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<T: Ord> {
    pub items: BTreeSet<T>,
    /// Set when the underlying query failed.
    pub warning: Option<String>,
}

impl<T: Ord> Resolution<T> {
    fn found(items: BTreeSet<T>) -> Self {
        Self {
            items,
            warning: None,
        }
    }

    fn failed(warning: String) -> Self {
        Self {
            items: BTreeSet::new(),
            warning: Some(warning),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PatchResolver
// ---------------------------------------------------------------------------

/// Looks up the deduplicated KB set for an OS in the patch catalog.
#[derive(Clone)]
pub struct PatchResolver {
    catalog: Arc<dyn PatchCatalog>,
}

impl PatchResolver {
    pub fn new(catalog: Arc<dyn PatchCatalog>) -> Self {
        Self { catalog }
    }

    /// Rows without a KB, or with a KB that fails validation, are skipped.
    pub async fn resolve(&self, os: &OsKey) -> Resolution<KbId> {
        let rows = match self.catalog.list_by_os(os).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(os = %os, error = %e, "Patch catalog query failed");
                return Resolution::failed(format!("patch catalog query for {os} failed: {e}"));
            }
        };

        let total_rows = rows.len();
        let mut kbs = BTreeSet::new();
        let mut missing = 0usize;

        for row in rows {
            let Some(raw) = row.kb.filter(|kb| !kb.trim().is_empty()) else {
                missing += 1;
                continue;
            };
            match KbId::parse(&raw) {
                Ok(kb) => {
                    kbs.insert(kb);
                }
                Err(e) => {
                    tracing::warn!(os = %os, kb = %raw, error = %e, "Skipping invalid catalog KB");
                }
            }
        }

        if missing > 0 {
            tracing::debug!(os = %os, missing, "Skipped catalog rows without a KB");
        }
        tracing::info!(os = %os, total_rows, kbs = kbs.len(), "Resolved patches");

        Resolution::found(kbs)
    }
}

// ---------------------------------------------------------------------------
// TargetResolver
// ---------------------------------------------------------------------------

/// Finds running machines whose OS tag matches an OS group.
#[derive(Clone)]
pub struct TargetResolver {
    directory: Arc<dyn InstanceDirectory>,
}

impl TargetResolver {
    pub fn new(directory: Arc<dyn InstanceDirectory>) -> Self {
        Self { directory }
    }

    /// Tags are compared after the same normalization as [`OsKey::parse`].
    pub async fn resolve(&self, os: &OsKey) -> Resolution<MachineId> {
        let instances = match self.directory.list_running().await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::warn!(os = %os, error = %e, "Instance directory query failed");
                return Resolution::failed(format!("instance directory query for {os} failed: {e}"));
            }
        };

        let machines: BTreeSet<MachineId> = instances
            .into_iter()
            .filter(|instance| {
                let matched = instance
                    .os_tag
                    .as_deref()
                    .is_some_and(|tag| os.matches_tag(tag));
                tracing::trace!(
                    instance_id = %instance.id,
                    os_tag = ?instance.os_tag,
                    os = %os,
                    matched,
                    "Compared instance OS tag",
                );
                matched
            })
            .map(|instance| instance.id)
            .collect();

        tracing::info!(os = %os, machines = machines.len(), "Resolved target machines");

        Resolution::found(machines)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
