//! Revocation tracking for certificate authorities.
//!
//! Known-revoked serials only ever grow: a refresh computes the difference
//! between the fetched list and the stored set and writes the new serials.
//! Nothing is cleared first, so a failed or partial fetch never loses data.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::RevocationConfig;
use crate::error::{Result, TrustStoreError};
use crate::fetcher::RevocationListFetcher;
use crate::models::{AuthorityRecord, Certificate, RefreshOutcome, SerialNumber};
use crate::repository::AuthorityRepository;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of refreshing every tracked authority.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub outcomes: Vec<RefreshOutcome>,
    /// Authority key id and the error its refresh failed with
    pub failures: Vec<(String, TrustStoreError)>,
    /// Authorities skipped because no revocation list URL is known
    pub skipped: Vec<String>,
}

impl RefreshReport {
    pub fn added_count(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.added.len()).sum()
    }
}

pub struct RevocationTracker {
    repository: Arc<dyn AuthorityRepository>,
    fetcher: Arc<dyn RevocationListFetcher>,
    fetch_timeout: Duration,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RevocationTracker {
    pub fn new(
        repository: Arc<dyn AuthorityRepository>,
        fetcher: Arc<dyn RevocationListFetcher>,
    ) -> Self {
        Self {
            repository,
            fetcher,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            refresh_locks: DashMap::new(),
        }
    }

    pub fn from_config(
        config: &RevocationConfig,
        repository: Arc<dyn AuthorityRepository>,
        fetcher: Arc<dyn RevocationListFetcher>,
    ) -> Self {
        Self::new(repository, fetcher).with_fetch_timeout(config.fetch_timeout())
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    // =============================================================================
    // Authorities
    // =============================================================================

    /// Find or create the durable record for `authority`.
    ///
    /// The CRL distribution points of a certificate name its issuer's list,
    /// so the record's URL is seeded from `issued` (a certificate signed by
    /// `authority`) when the store has none yet. An existing URL is kept.
    pub async fn track(
        &self,
        authority: &Certificate,
        issued: Option<&Certificate>,
    ) -> Result<AuthorityRecord> {
        let mut record = self
            .repository
            .find_or_create(
                &authority.key_id,
                &authority.subject_dn,
                authority.not_before,
                authority.not_after,
            )
            .await?;

        if record.revocation_list_url.is_none() {
            if let Some(url) = issued.and_then(|cert| cert.crl_urls.first()) {
                self.repository.set_revocation_list_url(&record, url).await?;
                info!(authority = %record.key_id, url = %url, "Tracking revocation list");
                record.revocation_list_url = Some(url.clone());
            }
        }

        Ok(record)
    }

    /// Point an authority at an explicit revocation list location.
    pub async fn set_revocation_list_url(&self, authority: &AuthorityRecord, url: &str) -> Result<()> {
        self.repository.set_revocation_list_url(authority, url).await
    }

    pub async fn revoked_serials(&self, authority: &AuthorityRecord) -> Result<BTreeSet<SerialNumber>> {
        self.repository.revoked_serials(authority).await
    }

    // =============================================================================
    // Refresh
    // =============================================================================

    /// Fetch the authority's revocation list and store serials not yet known.
    ///
    /// Refreshes of the same authority are serialized; different authorities
    /// refresh independently. Running twice with an unchanged list writes
    /// nothing the second time.
    ///
    /// # Errors
    /// `MissingRevocationUrl` when no URL is known, `Timeout` when the fetch
    /// exceeds the configured timeout, `RetrievalError` for network or parse
    /// failures. Stored serials are untouched on every error path.
    pub async fn refresh(&self, authority: &AuthorityRecord) -> Result<RefreshOutcome> {
        self.refresh_with_timeout(authority, self.fetch_timeout).await
    }

    /// [`RevocationTracker::refresh`] with a caller-supplied fetch timeout.
    pub async fn refresh_with_timeout(
        &self,
        authority: &AuthorityRecord,
        fetch_timeout: Duration,
    ) -> Result<RefreshOutcome> {
        let lock = self.refresh_lock(&authority.key_id);
        let _guard = lock.lock().await;

        let url = self
            .repository
            .revocation_list_url(authority)
            .await?
            .ok_or_else(|| TrustStoreError::MissingRevocationUrl(authority.key_id.clone()))?;

        let list = tokio::time::timeout(fetch_timeout, self.fetcher.fetch(&url))
            .await
            .map_err(|_| TrustStoreError::Timeout {
                url: url.clone(),
                timeout_secs: fetch_timeout.as_secs(),
            })??;

        let fetched: BTreeSet<SerialNumber> = list.serials.into_iter().collect();
        let known = self.repository.revoked_serials(authority).await?;

        let mut added = Vec::new();
        for serial in fetched.difference(&known) {
            if self.repository.add_revoked_serial(authority, serial).await? {
                added.push(serial.clone());
            }
        }

        info!(
            authority = %authority.key_id,
            fetched = fetched.len(),
            added = added.len(),
            "Refreshed revocation list"
        );

        Ok(RefreshOutcome {
            authority_key_id: authority.key_id.clone(),
            fetched: fetched.len(),
            added,
        })
    }

    /// Refresh every authority with a known URL, one after another.
    ///
    /// A failing authority does not stop the others; its error is collected
    /// in the report.
    ///
    /// # Errors
    /// Only when the authority list itself cannot be read.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();

        for authority in self.repository.list_authorities().await? {
            if authority.revocation_list_url.is_none() {
                debug!(authority = %authority.key_id, "No revocation list URL, skipping");
                report.skipped.push(authority.key_id);
                continue;
            }

            match self.refresh(&authority).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    error!(authority = %authority.key_id, error = %err, "Revocation refresh failed");
                    report.failures.push((authority.key_id, err));
                }
            }
        }

        Ok(report)
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// True iff `serial` is in the authority's known-revoked set.
    ///
    /// No stored data for the authority means "not revoked", not "unknown".
    pub async fn is_revoked(&self, authority: &AuthorityRecord, serial: &SerialNumber) -> Result<bool> {
        Ok(self.repository.revoked_serials(authority).await?.contains(serial))
    }

    /// Resolve the authority by key id, then check `serial`.
    ///
    /// An authority without a record is treated as having revoked nothing.
    pub async fn is_revoked_by_key_id(&self, key_id: &str, serial: &SerialNumber) -> Result<bool> {
        match self.repository.find_by_key_id(key_id).await? {
            Some(authority) => self.is_revoked(&authority, serial).await,
            None => {
                debug!(key_id, "No authority record, treating as not revoked");
                Ok(false)
            }
        }
    }

    fn refresh_lock(&self, key_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(key_id.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RevocationList;
    use crate::repository::InMemoryAuthorityRepository;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CRL_URL: &str = "http://crl.example.com/issuing.crl";

    /// Replays queued responses; repeats the last one once the queue is drained.
    #[derive(Default)]
    struct StubFetcher {
        responses: parking_lot::Mutex<VecDeque<Result<RevocationList>>>,
        last: parking_lot::Mutex<Option<Vec<SerialNumber>>>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn serving(serials: &[u64]) -> Self {
            let stub = Self::default();
            stub.push_serials(serials);
            stub
        }

        fn push_serials(&self, serials: &[u64]) {
            let serials = serials.iter().copied().map(SerialNumber::from).collect();
            self.responses
                .lock()
                .push_back(Ok(RevocationList::from_serials(serials)));
        }

        fn push_failure(&self) {
            self.responses.lock().push_back(Err(TrustStoreError::RetrievalError {
                url: CRL_URL.to_string(),
                reason: "connection reset".to_string(),
            }));
        }
    }

    #[async_trait]
    impl RevocationListFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> Result<RevocationList> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().pop_front() {
                Some(Ok(list)) => {
                    *self.last.lock() = Some(list.serials.clone());
                    Ok(list)
                }
                Some(Err(err)) => Err(err),
                None => Ok(RevocationList::from_serials(
                    self.last.lock().clone().unwrap_or_default(),
                )),
            }
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl RevocationListFetcher for SlowFetcher {
        async fn fetch(&self, _url: &str) -> Result<RevocationList> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RevocationList::from_serials(Vec::new()))
        }
    }

    fn issuing_ca() -> Certificate {
        let now = Utc::now();
        Certificate::new(
            "A1",
            "CN=Issuing CA",
            now - ChronoDuration::days(1),
            now + ChronoDuration::days(365),
            true,
        )
    }

    fn issued_leaf() -> Certificate {
        let now = Utc::now();
        Certificate::new("L1", "CN=leaf", now, now + ChronoDuration::days(30), false)
            .with_signing_key_id("A1")
            .with_crl_url(CRL_URL)
    }

    fn tracker(fetcher: Arc<dyn RevocationListFetcher>) -> (RevocationTracker, Arc<InMemoryAuthorityRepository>) {
        let repository = Arc::new(InMemoryAuthorityRepository::new());
        let tracker = RevocationTracker::new(repository.clone(), fetcher);
        (tracker, repository)
    }

    #[tokio::test]
    async fn test_track_seeds_url_from_issued_certificate() {
        let (tracker, repository) = tracker(Arc::new(StubFetcher::default()));

        let record = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();
        assert_eq!(record.revocation_list_url.as_deref(), Some(CRL_URL));

        // An existing URL is not overwritten by later sightings
        let now = Utc::now();
        let other = Certificate::new("L2", "CN=other", now, now, false)
            .with_crl_url("http://ignored.example.com/x.crl");
        let again = tracker.track(&issuing_ca(), Some(&other)).await.unwrap();
        assert_eq!(again.id, record.id);
        assert_eq!(
            repository.revocation_list_url(&again).await.unwrap().as_deref(),
            Some(CRL_URL)
        );
    }

    #[tokio::test]
    async fn test_refresh_adds_only_new_serials() {
        let fetcher = Arc::new(StubFetcher::serving(&[5, 7]));
        fetcher.push_serials(&[5, 7, 9]);
        let (tracker, _repository) = tracker(fetcher);
        let authority = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();

        let first = tracker.refresh(&authority).await.unwrap();
        assert_eq!(first.added.len(), 2);
        assert!(tracker.is_revoked(&authority, &SerialNumber::from(7u64)).await.unwrap());
        assert!(!tracker.is_revoked(&authority, &SerialNumber::from(9u64)).await.unwrap());

        let second = tracker.refresh(&authority).await.unwrap();
        assert_eq!(second.added, vec![SerialNumber::from(9u64)]);
        assert!(tracker.is_revoked(&authority, &SerialNumber::from(9u64)).await.unwrap());
        assert_eq!(tracker.revoked_serials(&authority).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_twice_with_same_list_is_idempotent() {
        let (tracker, _repository) = tracker(Arc::new(StubFetcher::serving(&[1, 2, 3])));
        let authority = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();

        tracker.refresh(&authority).await.unwrap();
        let before = tracker.revoked_serials(&authority).await.unwrap();
        let second = tracker.refresh(&authority).await.unwrap();

        assert!(second.added.is_empty());
        assert_eq!(tracker.revoked_serials(&authority).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_known_serials() {
        let fetcher = Arc::new(StubFetcher::serving(&[5, 7]));
        fetcher.push_failure();
        let (tracker, _repository) = tracker(fetcher);
        let authority = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();

        tracker.refresh(&authority).await.unwrap();
        let err = tracker.refresh(&authority).await.unwrap_err();

        assert!(err.is_retrieval());
        assert_eq!(tracker.revoked_serials(&authority).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_fetch_never_removes_serials() {
        let fetcher = Arc::new(StubFetcher::serving(&[5, 7]));
        fetcher.push_serials(&[]);
        let (tracker, _repository) = tracker(fetcher);
        let authority = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();

        tracker.refresh(&authority).await.unwrap();
        tracker.refresh(&authority).await.unwrap();

        assert!(tracker.is_revoked(&authority, &SerialNumber::from(5u64)).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_without_url_is_retrieval_error() {
        let (tracker, _repository) = tracker(Arc::new(StubFetcher::default()));
        let authority = tracker.track(&issuing_ca(), None).await.unwrap();

        let err = tracker.refresh(&authority).await.unwrap_err();
        assert!(matches!(err, TrustStoreError::MissingRevocationUrl(_)));
    }

    #[tokio::test]
    async fn test_refresh_times_out() {
        let (tracker, _repository) = tracker(Arc::new(SlowFetcher));
        let tracker = tracker.with_fetch_timeout(Duration::from_millis(50));
        let authority = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();

        let err = tracker.refresh(&authority).await.unwrap_err();
        assert!(matches!(err, TrustStoreError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_of_one_authority_are_serialized() {
        let fetcher = Arc::new(StubFetcher::serving(&[1, 2, 3, 4]));
        let (tracker, _repository) = tracker(fetcher.clone());
        let authority = tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();

        let (a, b) = tokio::join!(tracker.refresh(&authority), tracker.refresh(&authority));
        let total_added = a.unwrap().added.len() + b.unwrap().added.len();

        assert_eq!(total_added, 4);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_authority_is_not_revoked() {
        let (tracker, _repository) = tracker(Arc::new(StubFetcher::default()));
        let revoked = tracker
            .is_revoked_by_key_id("nobody", &SerialNumber::from(1u64))
            .await
            .unwrap();
        assert!(!revoked);
    }

    #[tokio::test]
    async fn test_refresh_all_collects_failures() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.push_failure();
        fetcher.push_serials(&[8]);
        let (tracker, _repository) = tracker(fetcher);

        let now = Utc::now();
        let second_ca = Certificate::new("A2", "CN=Second CA", now, now + ChronoDuration::days(1), true);
        tracker.track(&issuing_ca(), Some(&issued_leaf())).await.unwrap();
        tracker.track(&second_ca, Some(&issued_leaf())).await.unwrap();
        tracker.track(&Certificate::new("A3", "CN=No CRL", now, now, true), None)
            .await
            .unwrap();

        let report = tracker.refresh_all().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "A1");
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.added_count(), 1);
        assert_eq!(report.skipped, vec!["A3".to_string()]);
    }
}
