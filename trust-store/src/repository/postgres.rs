//! PostgreSQL-backed authority repository
//!
//! Authorities are keyed by key id; revoked serials live in their own table
//! with a composite primary key so repeated inserts are no-ops.

use crate::{
    error::{Result, TrustStoreError},
    models::{AuthorityRecord, SerialNumber},
    repository::AuthorityRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS certificate_authorities (
        id UUID PRIMARY KEY,
        key_id TEXT NOT NULL UNIQUE,
        subject_dn TEXT NOT NULL,
        not_before TIMESTAMPTZ NOT NULL,
        not_after TIMESTAMPTZ NOT NULL,
        revocation_list_url TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS revoked_serials (
        authority_id UUID NOT NULL REFERENCES certificate_authorities(id),
        serial TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (authority_id, serial)
    )
    "#,
];

const SELECT_AUTHORITY: &str = r#"
    SELECT id, key_id, subject_dn, not_before, not_after,
           revocation_list_url, created_at, updated_at
    FROM certificate_authorities
"#;

/// PostgreSQL-backed authority repository
pub struct PostgresAuthorityRepository {
    pool: PgPool,
}

impl PostgresAuthorityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create with connection string
    pub async fn from_connection_string(connection_string: &str) -> Result<Self> {
        let pool = PgPool::connect(connection_string)
            .await
            .map_err(|e| TrustStoreError::StorageError(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Authority schema ready");
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> Result<AuthorityRecord> {
        Ok(AuthorityRecord {
            id: row.try_get("id")?,
            key_id: row.try_get("key_id")?,
            subject_dn: row.try_get("subject_dn")?,
            not_before: row.try_get("not_before")?,
            not_after: row.try_get("not_after")?,
            revocation_list_url: row.try_get("revocation_list_url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AuthorityRepository for PostgresAuthorityRepository {
    async fn find_or_create(
        &self,
        key_id: &str,
        subject_dn: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<AuthorityRecord> {
        sqlx::query(
            r#"
            INSERT INTO certificate_authorities (id, key_id, subject_dn, not_before, not_after)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key_id)
        .bind(subject_dn)
        .bind(not_before)
        .bind(not_after)
        .execute(&self.pool)
        .await
        .map_err(|e| TrustStoreError::StorageError(format!("Failed to create authority: {e}")))?;

        self.find_by_key_id(key_id).await?.ok_or_else(|| {
            TrustStoreError::StorageError(format!("Authority {key_id} missing after insert"))
        })
    }

    async fn find_by_key_id(&self, key_id: &str) -> Result<Option<AuthorityRecord>> {
        let row = sqlx::query(&format!("{SELECT_AUTHORITY} WHERE key_id = $1"))
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>> {
        let rows = sqlx::query(&format!("{SELECT_AUTHORITY} ORDER BY key_id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn add_revoked_serial(
        &self,
        authority: &AuthorityRecord,
        serial: &SerialNumber,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO revoked_serials (authority_id, serial)
            VALUES ($1, $2)
            ON CONFLICT (authority_id, serial) DO NOTHING
            "#,
        )
        .bind(authority.id)
        .bind(serial.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| TrustStoreError::StorageError(format!("Failed to add revoked serial: {e}")))?;

        let added = result.rows_affected() > 0;
        debug!(authority = %authority.key_id, serial = %serial, added, "Recorded revoked serial");
        Ok(added)
    }

    async fn revoked_serials(&self, authority: &AuthorityRecord) -> Result<BTreeSet<SerialNumber>> {
        let rows = sqlx::query("SELECT serial FROM revoked_serials WHERE authority_id = $1")
            .bind(authority.id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let serial: String = row.try_get("serial")?;
                SerialNumber::from_hex(&serial)
            })
            .collect()
    }

    async fn revocation_list_url(&self, authority: &AuthorityRecord) -> Result<Option<String>> {
        let row = sqlx::query("SELECT revocation_list_url FROM certificate_authorities WHERE id = $1")
            .bind(authority.id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("revocation_list_url")?),
            None => Ok(None),
        }
    }

    async fn set_revocation_list_url(&self, authority: &AuthorityRecord, url: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE certificate_authorities
            SET revocation_list_url = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(url)
        .bind(authority.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            TrustStoreError::StorageError(format!("Failed to set revocation list URL: {e}"))
        })?;

        Ok(())
    }
}
