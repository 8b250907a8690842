//! services/api/src/adapters/pg_store.rs
//!
//! This module contains the Postgres adapter, a concrete implementation of
//! the `UserStore` port from the `core` crate. Each account is one row
//! holding the raw JSON record, so migration still happens in the core.

use async_trait::async_trait;
use chat_core::ports::{PortError, PortResult, StoredUsers, UserStore};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use serde_json::Value;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `UserStore` port.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Creates a new `PgUserStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecordRow {
    account_id: String,
    record: Json<Value>,
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `UserStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserStore for PgUserStore {
    async fn load(&self) -> PortResult<StoredUsers> {
        let rows = sqlx::query_as::<_, UserRecordRow>(
            "SELECT account_id, record FROM user_records",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.account_id, row.record.0))
            .collect())
    }

    /// Replaces the stored mapping inside one transaction: every account is
    /// upserted and rows for accounts no longer present are removed.
    async fn save(&self, users: &StoredUsers) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        for (account_id, record) in users {
            sqlx::query(
                "INSERT INTO user_records (account_id, record, updated_at) VALUES ($1, $2, NOW())
                 ON CONFLICT (account_id) DO UPDATE
                 SET record = EXCLUDED.record, updated_at = NOW()
                 WHERE user_records.record IS DISTINCT FROM EXCLUDED.record",
            )
            .bind(account_id)
            .bind(Json(record))
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        let accounts: Vec<String> = users.keys().cloned().collect();
        sqlx::query("DELETE FROM user_records WHERE NOT (account_id = ANY($1))")
            .bind(&accounts)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)
    }
}
