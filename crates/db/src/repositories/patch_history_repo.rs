//! Repository for the `patch_history` table.
//!
//! Rows are insert-only; there is no update or delete.

use patchflow_core::MachineHistoryRecord;
use sqlx::PgPool;

use crate::models::patch_history::PatchHistoryRow;

/// Column list for `patch_history` queries.
const COLUMNS: &str = "\
    id, machine_id, recorded_at, job_id, os, kb, state, \
    reboot_required, output, error, created_at";

/// Maximum rows returned by [`PatchHistoryRepo::list_for_machine`].
const MAX_LIMIT: i64 = 500;

pub struct PatchHistoryRepo;

impl PatchHistoryRepo {
    /// Insert one history record. A second record with the same
    /// `(machine_id, recorded_at)` fails with a unique violation.
    pub async fn insert(
        pool: &PgPool,
        record: &MachineHistoryRecord,
    ) -> Result<PatchHistoryRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO patch_history \
                 (machine_id, recorded_at, job_id, os, kb, state, reboot_required, output, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PatchHistoryRow>(&query)
            .bind(&record.machine_id)
            .bind(record.timestamp)
            .bind(record.job_id.as_deref())
            .bind(record.os.as_str())
            .bind(record.kb.as_str())
            .bind(record.state.as_str())
            .bind(record.reboot_required.as_bool())
            .bind(&record.output)
            .bind(record.error.as_deref())
            .fetch_one(pool)
            .await
    }

    /// Most recent records for one machine, newest first.
    pub async fn list_for_machine(
        pool: &PgPool,
        machine_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<PatchHistoryRow>, sqlx::Error> {
        let limit = limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT);
        let query = format!(
            "SELECT {COLUMNS} FROM patch_history \
             WHERE machine_id = $1 \
             ORDER BY recorded_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, PatchHistoryRow>(&query)
            .bind(machine_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
