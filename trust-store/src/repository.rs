use crate::{
    error::{Result, TrustStoreError},
    models::{AuthorityRecord, SerialNumber},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod postgres;

pub use postgres::PostgresAuthorityRepository;

/// Durable store of certificate authorities and their revoked serials
#[async_trait]
pub trait AuthorityRepository: Send + Sync {
    /// Return the authority with this key id, creating it when first seen
    async fn find_or_create(
        &self,
        key_id: &str,
        subject_dn: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<AuthorityRecord>;

    /// Look up an authority without creating it
    async fn find_by_key_id(&self, key_id: &str) -> Result<Option<AuthorityRecord>>;

    /// Every authority known to the store
    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>>;

    /// Record a revoked serial. Idempotent; returns `true` only when a new
    /// entry was written.
    async fn add_revoked_serial(
        &self,
        authority: &AuthorityRecord,
        serial: &SerialNumber,
    ) -> Result<bool>;

    async fn revoked_serials(&self, authority: &AuthorityRecord) -> Result<BTreeSet<SerialNumber>>;

    async fn revocation_list_url(&self, authority: &AuthorityRecord) -> Result<Option<String>>;

    async fn set_revocation_list_url(&self, authority: &AuthorityRecord, url: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct AuthorityEntry {
    record: AuthorityRecord,
    revoked: BTreeSet<SerialNumber>,
}

/// In-memory authority repository for tests and single-process use
pub struct InMemoryAuthorityRepository {
    authorities: Arc<DashMap<String, AuthorityEntry>>,
}

impl InMemoryAuthorityRepository {
    pub fn new() -> Self {
        Self {
            authorities: Arc::new(DashMap::new()),
        }
    }

    fn unknown(authority: &AuthorityRecord) -> TrustStoreError {
        TrustStoreError::StorageError(format!("Unknown authority: {}", authority.key_id))
    }
}

impl Default for InMemoryAuthorityRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorityRepository for InMemoryAuthorityRepository {
    async fn find_or_create(
        &self,
        key_id: &str,
        subject_dn: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<AuthorityRecord> {
        let entry = self
            .authorities
            .entry(key_id.to_string())
            .or_insert_with(|| AuthorityEntry {
                record: AuthorityRecord::new(key_id, subject_dn, not_before, not_after),
                revoked: BTreeSet::new(),
            });
        Ok(entry.record.clone())
    }

    async fn find_by_key_id(&self, key_id: &str) -> Result<Option<AuthorityRecord>> {
        Ok(self
            .authorities
            .get(key_id)
            .map(|entry| entry.record.clone()))
    }

    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>> {
        let mut records: Vec<AuthorityRecord> = self
            .authorities
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect();
        records.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        Ok(records)
    }

    async fn add_revoked_serial(
        &self,
        authority: &AuthorityRecord,
        serial: &SerialNumber,
    ) -> Result<bool> {
        let mut entry = self
            .authorities
            .get_mut(&authority.key_id)
            .ok_or_else(|| Self::unknown(authority))?;
        Ok(entry.revoked.insert(serial.clone()))
    }

    async fn revoked_serials(&self, authority: &AuthorityRecord) -> Result<BTreeSet<SerialNumber>> {
        Ok(self
            .authorities
            .get(&authority.key_id)
            .map(|entry| entry.revoked.clone())
            .unwrap_or_default())
    }

    async fn revocation_list_url(&self, authority: &AuthorityRecord) -> Result<Option<String>> {
        Ok(self
            .authorities
            .get(&authority.key_id)
            .and_then(|entry| entry.record.revocation_list_url.clone()))
    }

    async fn set_revocation_list_url(&self, authority: &AuthorityRecord, url: &str) -> Result<()> {
        let mut entry = self
            .authorities
            .get_mut(&authority.key_id)
            .ok_or_else(|| Self::unknown(authority))?;
        entry.record.revocation_list_url = Some(url.to_string());
        entry.record.updated_at = Utc::now();
        Ok(())
    }
}
