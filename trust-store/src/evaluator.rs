use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::alerts::AlertSink;
use crate::models::{AnomalyKind, Certificate};
use crate::registry::CertificateRegistry;

pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 10;

/// Configured trust anchors, by key id.
///
/// Keeps the configured order for display while answering membership in
/// constant time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedRoots {
    ordered: Vec<String>,
    members: HashSet<String>,
}

impl TrustedRoots {
    pub fn new<I, S>(key_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roots = Self::default();
        for key_id in key_ids {
            let key_id = key_id.into();
            if roots.members.insert(key_id.clone()) {
                roots.ordered.push(key_id);
            }
        }
        roots
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.members.contains(key_id)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Chain-of-trust evaluation over one consistent view of the registry and
/// trusted roots.
///
/// Chain links are key-id links: a certificate's signer is the registry
/// entry whose key id equals its signing key id. Only expiry and trust-root
/// membership are checked.
pub struct TrustEvaluator<'a> {
    registry: &'a CertificateRegistry,
    trusted_roots: &'a TrustedRoots,
    alerts: &'a dyn AlertSink,
    max_depth: usize,
}

impl<'a> TrustEvaluator<'a> {
    pub fn new(
        registry: &'a CertificateRegistry,
        trusted_roots: &'a TrustedRoots,
        alerts: &'a dyn AlertSink,
    ) -> Self {
        Self {
            registry,
            trusted_roots,
            alerts,
            max_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Signers from the immediate issuer up to and including a trusted root,
    /// or empty when no trusted chain exists.
    pub fn chain(&self, certificate: &Certificate) -> Vec<Arc<Certificate>> {
        self.chain_at(certificate, Utc::now())
    }

    pub fn chain_at(&self, certificate: &Certificate, now: DateTime<Utc>) -> Vec<Arc<Certificate>> {
        let Some(mut signing_key_id) = certificate.signing_key_id.clone() else {
            debug!(key_id = %certificate.key_id, "No signing key id; chain is empty");
            return Vec::new();
        };

        let mut chain: Vec<Arc<Certificate>> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            if chain.len() >= self.max_depth || !visited.insert(signing_key_id.clone()) {
                self.notify(
                    AnomalyKind::ChainDepthExceeded,
                    &certificate.key_id,
                    &format!(
                        "signer walk stopped at {signing_key_id} after {} links (limit {})",
                        chain.len(),
                        self.max_depth
                    ),
                );
                return Vec::new();
            }

            let Some(signer) = self.registry.lookup(&signing_key_id) else {
                debug!(
                    key_id = %certificate.key_id,
                    signer = %signing_key_id,
                    "Unknown signer; chain is empty"
                );
                return Vec::new();
            };

            if !signer.is_within_validity(now) {
                // Keep walking: the chain is still reported for diagnostics
                self.notify(
                    AnomalyKind::ExpiredCertificate,
                    &signer.key_id,
                    &format!(
                        "{} valid {} to {}, encountered in chain of {}",
                        signer.subject_dn, signer.not_before, signer.not_after, certificate.key_id
                    ),
                );
            }

            let reached_root = self.trusted_roots.contains(&signer.key_id);
            let self_signed = signer.is_self_signed();
            let next = signer.signing_key_id.clone();
            chain.push(signer);

            if reached_root {
                return chain;
            }

            match next {
                Some(next) if !self_signed => signing_key_id = next,
                _ => {
                    debug!(
                        key_id = %certificate.key_id,
                        signer = %signing_key_id,
                        "Walk ended at an untrusted self-signed certificate"
                    );
                    return Vec::new();
                }
            }
        }
    }

    /// Own validity window contains `now`, and the certificate is either a
    /// trusted root itself or chains to one.
    pub fn is_valid(&self, certificate: &Certificate) -> bool {
        self.is_valid_at(certificate, Utc::now())
    }

    pub fn is_valid_at(&self, certificate: &Certificate, now: DateTime<Utc>) -> bool {
        if !certificate.is_within_validity(now) {
            return false;
        }
        self.trusted_roots.contains(&certificate.key_id)
            || !self.chain_at(certificate, now).is_empty()
    }

    pub fn all_certificates_valid(&self) -> bool {
        self.all_certificates_valid_at(Utc::now())
    }

    pub fn all_certificates_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.registry.each().all(|cert| self.is_valid_at(cert, now))
    }

    /// Key ids of every registry entry that is not valid, evaluated against
    /// this view before anything is removed.
    pub fn untrusted_key_ids_at(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        self.registry
            .each()
            .filter(|cert| !self.is_valid_at(cert, now))
            .map(|cert| cert.key_id.clone())
            .collect()
    }

    fn notify(&self, kind: AnomalyKind, key_id: &str, details: &str) {
        if let Err(err) = self.alerts.notify_anomaly(kind, key_id, details) {
            warn!(anomaly = %kind, key_id = key_id, error = %err, "Alert sink failed");
        }
    }
}
