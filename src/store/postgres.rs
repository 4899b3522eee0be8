//! Postgres document store: `users`, `otps`, `config_documents` and `meta_documents`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{types::Json, PgPool, Row};
use tracing::Instrument;

use super::{
    AdminAllowList, ConfigStore, OtpRecord, OtpRepository, UserDirectory, UserDocument,
    ADMINS_DOCUMENT,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserDocument>> {
        let query = "SELECT doc FROM users WHERE uid = $1";
        let row = sqlx::query(query)
            .bind(uid)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user document")?;

        row.map(|row| row.try_get::<Json<UserDocument>, _>("doc").map(|doc| doc.0))
            .transpose()
            .context("failed to decode user document")
    }

    async fn merge_user(&self, uid: &str, patch: &UserDocument) -> Result<()> {
        let mut patch = patch.clone();
        // `||` would let a false overwrite true.
        if patch.is_verified == Some(false) {
            patch.is_verified = None;
        }

        let query = r"
            INSERT INTO users (uid, doc)
            VALUES ($1, $2)
            ON CONFLICT (uid) DO UPDATE
            SET doc = users.doc || EXCLUDED.doc, updated_at = NOW()
        ";
        sqlx::query(query)
            .bind(uid)
            .bind(Json(&patch))
            .execute(&self.pool)
            .instrument(db_span("UPSERT", query))
            .await
            .context("failed to merge user document")?;
        Ok(())
    }
}

#[async_trait]
impl OtpRepository for PgStore {
    async fn put_otp(&self, email: &str, record: &OtpRecord) -> Result<()> {
        let query = r"
            INSERT INTO otps (email, otp, uid, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET otp = EXCLUDED.otp,
                uid = EXCLUDED.uid,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
        ";
        sqlx::query(query)
            .bind(email)
            .bind(&record.otp)
            .bind(&record.uid)
            .bind(record.expires_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(db_span("UPSERT", query))
            .await
            .context("failed to store otp")?;
        Ok(())
    }

    async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>> {
        let query = "SELECT otp, uid, expires_at, created_at FROM otps WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup otp")?;

        row.map(|row| -> Result<OtpRecord, sqlx::Error> {
            Ok(OtpRecord {
                otp: row.try_get("otp")?,
                uid: row.try_get("uid")?,
                expires_at: row.try_get("expires_at")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
        .context("failed to decode otp row")
    }

    async fn delete_otp(&self, email: &str) -> Result<()> {
        let query = "DELETE FROM otps WHERE email = $1";
        sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete otp")?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn get_config(&self, name: &str) -> Result<Option<Map<String, Value>>> {
        let query = "SELECT data FROM config_documents WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup config document")?;

        row.map(|row| row.try_get::<Json<Map<String, Value>>, _>("data").map(|data| data.0))
            .transpose()
            .context("failed to decode config document")
    }

    async fn merge_config(&self, name: &str, data: &Map<String, Value>) -> Result<()> {
        let query = r"
            INSERT INTO config_documents (name, data)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE
            SET data = config_documents.data || EXCLUDED.data, updated_at = NOW()
        ";
        sqlx::query(query)
            .bind(name)
            .bind(Json(data))
            .execute(&self.pool)
            .instrument(db_span("UPSERT", query))
            .await
            .context("failed to merge config document")?;
        Ok(())
    }

    async fn admin_allow_list(&self) -> Result<AdminAllowList> {
        let query = "SELECT data FROM meta_documents WHERE name = $1";
        let row = sqlx::query(query)
            .bind(ADMINS_DOCUMENT)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup admin allow-list")?;

        match row {
            Some(row) => row
                .try_get::<Json<AdminAllowList>, _>("data")
                .map(|list| list.0)
                .context("failed to decode admin allow-list"),
            None => Ok(AdminAllowList::default()),
        }
    }
}
