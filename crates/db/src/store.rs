//! [`ResultStore`] backed by the `patch_history` table.

use async_trait::async_trait;
use patchflow_core::clients::{ClientError, ResultStore};
use patchflow_core::MachineHistoryRecord;

use crate::repositories::PatchHistoryRepo;
use crate::DbPool;

const SERVICE: &str = "postgres";

pub struct PgHistoryStore {
    pool: DbPool,
}

impl PgHistoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgHistoryStore {
    async fn append(&self, record: &MachineHistoryRecord) -> Result<(), ClientError> {
        match PatchHistoryRepo::insert(&self.pool, record).await {
            Ok(row) => {
                tracing::debug!(id = row.id, machine_id = %row.machine_id, "History row inserted");
                Ok(())
            }
            Err(e)
                if e
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
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
            Err(e) => Err(ClientError::request(SERVICE, e.to_string())),
        }
    }
}
