//! Row model for the `patch_history` table.

use patchflow_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `patch_history` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PatchHistoryRow {
    pub id: i64,
    pub machine_id: String,
    pub recorded_at: Timestamp,
    pub job_id: Option<String>,
    pub os: String,
    pub kb: String,
    pub state: String,
    /// `NULL` when the script output did not say.
    pub reboot_required: Option<bool>,
    pub output: String,
    pub error: Option<String>,
    pub created_at: Timestamp,
}
