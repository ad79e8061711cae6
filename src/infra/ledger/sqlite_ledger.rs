// SQLite-backed violation ledger for deployments where escalation state
// must survive restarts.
//
// Tables:
// - violations: Per (chat, user) count, mute expiry and ban flag
// - message_log: Recent message timestamps for the flood window

use crate::core::ledger::{LedgerError, ViolationLedger, ViolationRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteLedger {
    pool: Pool<Sqlite>,
}

impl SqliteLedger {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
                chat_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                muted_until TEXT,
                banned BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (chat_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_message_log_chat_user
                ON message_log(chat_id, user_id, timestamp);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ViolationLedger for SqliteLedger {
    async fn record_violation(&self, chat_id: &str, user_id: &str) -> Result<u32, LedgerError> {
        // RETURNING folds the read-back into the upsert, so every caller
        // gets the count its own increment produced.
        let row = sqlx::query(
            r#"
            INSERT INTO violations (chat_id, user_id, count)
            VALUES (?, ?, 1)
            ON CONFLICT(chat_id, user_id) DO UPDATE SET
                count = count + 1
            RETURNING count
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        let count: i64 = row.get("count");
        Ok(count as u32)
    }

    async fn get_record(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<ViolationRecord, LedgerError> {
        let row = sqlx::query(
            "SELECT count, muted_until, banned FROM violations WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        if let Some(row) = row {
            let muted_until = row
                .get::<Option<String>, _>("muted_until")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Ok(ViolationRecord {
                count: row.get::<i64, _>("count") as u32,
                muted_until,
                banned: row.get("banned"),
            })
        } else {
            Ok(ViolationRecord::default())
        }
    }

    async fn set_muted(
        &self,
        chat_id: &str,
        user_id: &str,
        duration_seconds: u64,
    ) -> Result<(), LedgerError> {
        let until = Utc::now() + Duration::seconds(duration_seconds as i64);
        sqlx::query(
            r#"
            INSERT INTO violations (chat_id, user_id, count, muted_until)
            VALUES (?, ?, 0, ?)
            ON CONFLICT(chat_id, user_id) DO UPDATE SET
                muted_until = excluded.muted_until
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(until.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn is_muted(&self, chat_id: &str, user_id: &str) -> Result<bool, LedgerError> {
        let record = self.get_record(chat_id, user_id).await?;
        Ok(record.muted_until.map(|until| Utc::now() < until).unwrap_or(false))
    }

    async fn set_banned(
        &self,
        chat_id: &str,
        user_id: &str,
        banned: bool,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO violations (chat_id, user_id, count, banned)
            VALUES (?, ?, 0, ?)
            ON CONFLICT(chat_id, user_id) DO UPDATE SET
                banned = excluded.banned
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(banned)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn reset(&self, chat_id: &str, user_id: &str) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM violations WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        sqlx::query("DELETE FROM message_log WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn register_message(
        &self,
        chat_id: &str,
        user_id: &str,
        window_seconds: u64,
    ) -> Result<u32, LedgerError> {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(window_seconds as i64);

        sqlx::query("INSERT INTO message_log (chat_id, user_id, timestamp) VALUES (?, ?, ?)")
            .bind(chat_id)
            .bind(user_id)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        // Inclusive window: a row aged exactly window_seconds still counts.
        sqlx::query("DELETE FROM message_log WHERE chat_id = ? AND user_id = ? AND timestamp < ?")
            .bind(chat_id)
            .bind(user_id)
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS message_count FROM message_log WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::StorageError(e.to_string()))?;

        let count: i64 = row.get("message_count");
        Ok(count as u32)
    }
}
