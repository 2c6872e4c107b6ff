use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::{AlertError, AlertSink, Anomaly, TracingAlertSink};
use crate::config::TrustStoreConfig;
use crate::error::Result;
use crate::evaluator::{TrustEvaluator, TrustedRoots, DEFAULT_MAX_CHAIN_DEPTH};
use crate::models::{AnomalyKind, Certificate, LoadReport};
use crate::registry::{self, CertificateRegistry};

/// Registry and trusted roots, guarded together.
#[derive(Debug, Default)]
struct TrustState {
    registry: CertificateRegistry,
    trusted_roots: TrustedRoots,
}

/// Anomalies raised while the state lock is held, delivered after it is released.
#[derive(Default)]
struct DeferredAlerts {
    pending: Mutex<Vec<Anomaly>>,
}

impl AlertSink for DeferredAlerts {
    fn notify_anomaly(
        &self,
        kind: AnomalyKind,
        certificate_key_id: &str,
        details: &str,
    ) -> std::result::Result<(), AlertError> {
        self.pending.lock().push(Anomaly {
            kind,
            certificate_key_id: certificate_key_id.to_string(),
            details: details.to_string(),
        });
        Ok(())
    }
}

impl DeferredAlerts {
    fn deliver(self, sink: &dyn AlertSink) {
        for anomaly in self.pending.into_inner() {
            if let Err(err) =
                sink.notify_anomaly(anomaly.kind, &anomaly.certificate_key_id, &anomaly.details)
            {
                warn!(
                    anomaly = %anomaly.kind,
                    key_id = %anomaly.certificate_key_id,
                    error = %err,
                    "Alert sink failed"
                );
            }
        }
    }
}

/// Process-wide trust authority with an explicit lifecycle.
///
/// Starts empty, is populated by [`TrustStore::load_certs`] and can be fully
/// repopulated with [`TrustStore::reload_certs`]. One lock guards both the
/// registry and the trusted-root set: readers share it, mutators take it
/// exclusively. File I/O always happens before the lock is taken, and the
/// alert sink is only called once the lock has been released.
pub struct TrustStore {
    state: RwLock<TrustState>,
    alerts: Arc<dyn AlertSink>,
    max_chain_depth: usize,
}

impl TrustStore {
    pub fn new(alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            state: RwLock::new(TrustState::default()),
            alerts,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }

    /// Build an empty store with the configured trusted roots and depth limit.
    pub fn from_config(config: &TrustStoreConfig, alerts: Arc<dyn AlertSink>) -> Self {
        let store = Self::new(alerts).with_max_chain_depth(config.max_chain_depth);
        store.reload_trusted_roots(config.trusted_roots.iter().cloned());
        store
    }

    pub fn with_max_chain_depth(mut self, max_chain_depth: usize) -> Self {
        self.max_chain_depth = max_chain_depth;
        self
    }

    // =============================================================================
    // Loading
    // =============================================================================

    /// Load every regular file in `directory` into the registry (non-recursive).
    ///
    /// # Errors
    /// Returns a load error if the directory itself cannot be read. Per-file
    /// failures are returned in the report.
    pub fn load_certs(&self, directory: &Path) -> Result<LoadReport> {
        let batch = registry::read_directory(directory)?;
        let report = self.state.write().registry.apply(batch);
        log_report(directory, &report);
        Ok(report)
    }

    /// Replace the registry content with the certificates of `directory`.
    ///
    /// The directory is read first; the clear and insert happen under one
    /// write guard, so readers never observe an empty store mid-reload.
    pub fn reload_certs(&self, directory: &Path) -> Result<LoadReport> {
        let batch = registry::read_directory(directory)?;
        let report = {
            let mut state = self.state.write();
            state.registry.clear();
            state.registry.apply(batch)
        };
        log_report(directory, &report);
        Ok(report)
    }

    /// Insert the CA certificates of one PEM file.
    pub fn add_pem_file(&self, path: &Path) -> Result<LoadReport> {
        let certificates = registry::read_pem_file(path)?;
        Ok(self.state.write().registry.extend(certificates))
    }

    /// Insert a single parsed certificate. Returns `false` for non-CA certificates.
    pub fn insert(&self, certificate: Certificate) -> bool {
        self.state.write().registry.insert(certificate)
    }

    // =============================================================================
    // Registry access
    // =============================================================================

    pub fn lookup(&self, key_id: &str) -> Option<Arc<Certificate>> {
        self.state.read().registry.lookup(key_id)
    }

    /// Snapshot of the current entries. Every call re-enumerates.
    pub fn each(&self) -> std::vec::IntoIter<Arc<Certificate>> {
        self.state
            .read()
            .registry
            .each()
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn count(&self) -> usize {
        self.state.read().registry.count()
    }

    pub fn remove(&self, key_id: &str) -> Option<Arc<Certificate>> {
        self.state.write().registry.remove(key_id)
    }

    pub fn clear(&self) {
        self.state.write().registry.clear();
    }

    // =============================================================================
    // Trusted roots
    // =============================================================================

    /// Atomically replace the trusted-root set.
    pub fn reload_trusted_roots<I, S>(&self, key_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roots = TrustedRoots::new(key_ids);
        info!(count = roots.len(), "Reloading trusted roots");
        self.state.write().trusted_roots = roots;
    }

    pub fn trusted_roots(&self) -> Vec<String> {
        self.state.read().trusted_roots.as_slice().to_vec()
    }

    // =============================================================================
    // Trust evaluation
    // =============================================================================

    pub fn chain(&self, certificate: &Certificate) -> Vec<Arc<Certificate>> {
        self.chain_at(certificate, Utc::now())
    }

    pub fn chain_at(&self, certificate: &Certificate, now: DateTime<Utc>) -> Vec<Arc<Certificate>> {
        self.evaluate(|evaluator| evaluator.chain_at(certificate, now))
    }

    pub fn is_valid(&self, certificate: &Certificate) -> bool {
        self.is_valid_at(certificate, Utc::now())
    }

    pub fn is_valid_at(&self, certificate: &Certificate, now: DateTime<Utc>) -> bool {
        self.evaluate(|evaluator| evaluator.is_valid_at(certificate, now))
    }

    /// Self-check: every stored certificate is independently valid.
    pub fn all_certificates_valid(&self) -> bool {
        self.evaluate(|evaluator| evaluator.all_certificates_valid())
    }

    /// Remove every certificate that is not valid under the current trust
    /// configuration. Returns the removed key ids.
    ///
    /// Validity of all entries is decided against one snapshot before any
    /// removal, and both steps run under the same write guard.
    pub fn prune_untrusted(&self) -> Vec<String> {
        self.prune_untrusted_at(Utc::now())
    }

    pub fn prune_untrusted_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let deferred = DeferredAlerts::default();
        let untrusted = {
            let mut state = self.state.write();
            let untrusted = self.evaluator(&state, &deferred).untrusted_key_ids_at(now);
            for key_id in &untrusted {
                state.registry.remove(key_id);
            }
            untrusted
        };
        deferred.deliver(self.alerts.as_ref());

        if !untrusted.is_empty() {
            warn!(removed = untrusted.len(), "Pruned untrusted certificates");
        }
        untrusted.into_iter().collect()
    }

    fn evaluate<T>(&self, evaluate: impl FnOnce(&TrustEvaluator<'_>) -> T) -> T {
        let deferred = DeferredAlerts::default();
        let result = {
            let state = self.state.read();
            evaluate(&self.evaluator(&state, &deferred))
        };
        deferred.deliver(self.alerts.as_ref());
        result
    }

    fn evaluator<'a>(
        &self,
        state: &'a TrustState,
        alerts: &'a DeferredAlerts,
    ) -> TrustEvaluator<'a> {
        TrustEvaluator::new(&state.registry, &state.trusted_roots, alerts)
            .with_max_depth(self.max_chain_depth)
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new(Arc::new(TracingAlertSink))
    }
}

fn log_report(directory: &Path, report: &LoadReport) {
    info!(
        directory = %directory.display(),
        loaded = report.loaded,
        discarded_leaves = report.discarded_leaves,
        failures = report.failures.len(),
        "Loaded certificate directory"
    );
}
