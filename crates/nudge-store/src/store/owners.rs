//! End users: where to reach them and whether setup is done.

use super::Store;
use crate::timestamp::format_ts;
use chrono::Utc;
use nudge_core::{error::NudgeError, owner::Owner};

type OwnerRow = (String, String, Option<String>, i64, bool);

fn owner_from_row((id, destination_address, display_name, offset, setup): OwnerRow) -> Owner {
    Owner {
        id,
        destination_address,
        display_name,
        utc_offset_minutes: offset as i32,
        setup_complete: setup,
    }
}

impl Store {
    /// Insert an owner on first contact, or refresh its destination address.
    ///
    /// Setup state and offset of an existing owner are left untouched.
    pub async fn ensure_owner(
        &self,
        id: &str,
        destination_address: &str,
        default_utc_offset_minutes: i32,
    ) -> Result<Owner, NudgeError> {
        let now = format_ts(Utc::now());
        sqlx::query(
            "INSERT INTO owners (id, destination_address, utc_offset_minutes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 destination_address = excluded.destination_address, \
                 updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(destination_address)
        .bind(default_utc_offset_minutes)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("upsert owner failed: {e}")))?;

        self.get_owner(id)
            .await?
            .ok_or_else(|| NudgeError::Store(format!("owner {id} vanished after upsert")))
    }

    /// Fetch an owner by id.
    pub async fn get_owner(&self, id: &str) -> Result<Option<Owner>, NudgeError> {
        let row: Option<OwnerRow> = sqlx::query_as(
            "SELECT id, destination_address, display_name, utc_offset_minutes, setup_complete \
             FROM owners WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("get owner failed: {e}")))?;

        Ok(row.map(owner_from_row))
    }

    /// Record the result of the setup exchange. Returns `false` for an
    /// unknown owner.
    pub async fn complete_setup(
        &self,
        id: &str,
        display_name: &str,
        utc_offset_minutes: i32,
    ) -> Result<bool, NudgeError> {
        let result = sqlx::query(
            "UPDATE owners SET display_name = ?, utc_offset_minutes = ?, setup_complete = 1, \
             updated_at = ? WHERE id = ?",
        )
        .bind(display_name)
        .bind(utc_offset_minutes)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("complete setup failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
