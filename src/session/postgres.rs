//! Durable session backend on Postgres (`sessions` table, see `sql/schema.sql`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::Instrument;

use super::{MetaPatch, SessionBackend, SessionRecord};
use crate::profile::Profile;

const SELECT_COLUMNS: &str = "id, uid, token_hash, expires_at, meta, created_at";

#[derive(Clone)]
pub struct PgSessionBackend {
    pool: PgPool,
}

impl PgSessionBackend {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn record_from_row(row: &PgRow) -> Result<SessionRecord, sqlx::Error> {
    let meta: Json<Profile> = row.try_get("meta")?;
    Ok(SessionRecord {
        id: row.try_get("id")?,
        uid: row.try_get("uid")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        meta: meta.0,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SessionBackend for PgSessionBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        // Re-running a migration must not duplicate rows.
        let query = r"
            INSERT INTO sessions (id, uid, token_hash, expires_at, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
        ";
        sqlx::query(query)
            .bind(record.id)
            .bind(&record.uid)
            .bind(&record.token_hash)
            .bind(record.expires_at)
            .bind(Json(&record.meta))
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<SessionRecord>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE token_hash = $1 LIMIT 1");
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup session")?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .context("failed to decode session row")
    }

    async fn latest_for_uid(&self, uid: &str) -> Result<Option<SessionRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM sessions WHERE uid = $1 ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(uid)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup latest session")?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .context("failed to decode session row")
    }

    async fn merge_meta_for_uid(&self, uid: &str, patch: &MetaPatch) -> Result<u64> {
        let query = "UPDATE sessions SET meta = meta || $2 WHERE uid = $1";
        let result = sqlx::query(query)
            .bind(uid)
            .bind(Json(patch))
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update session meta")?;
        Ok(result.rows_affected())
    }

    async fn rotate(&self, old_hash: &str, new_hash: &str, new_expires_at: i64) -> Result<bool> {
        let query = "UPDATE sessions SET token_hash = $2, expires_at = $3 WHERE token_hash = $1";
        let result = sqlx::query(query)
            .bind(old_hash)
            .bind(new_hash)
            .bind(new_expires_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to rotate session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM sessions ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list sessions")?;

        rows.iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to decode session row")
    }

    async fn clear(&self) -> Result<()> {
        let query = "DELETE FROM sessions";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to clear sessions")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn unreachable_database_surfaces_errors() -> anyhow::Result<()> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://helpdesk@127.0.0.1:1/helpdesk")?;
        let backend = PgSessionBackend::new(pool);

        assert!(backend.find_by_hash("h").await.is_err());
        assert!(backend.delete_by_hash("h").await.is_err());
        Ok(())
    }
}
