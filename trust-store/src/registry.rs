use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{Result, TrustStoreError};
use crate::models::{Certificate, LoadFailure, LoadReport};
use crate::x509;

/// Keyed collection of CA-capable certificates.
///
/// Every entry has `is_ca == true`; inserting under an existing key id
/// replaces the previous certificate (last loaded wins).
#[derive(Debug, Default, Clone)]
pub struct CertificateRegistry {
    certificates: HashMap<String, Arc<Certificate>>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a certificate. Non-CA certificates are discarded and `false` is returned.
    pub fn insert(&mut self, certificate: Certificate) -> bool {
        if !certificate.is_ca {
            debug!(key_id = %certificate.key_id, "Discarding non-CA certificate");
            return false;
        }

        let key_id = certificate.key_id.clone();
        if self
            .certificates
            .insert(key_id.clone(), Arc::new(certificate))
            .is_some()
        {
            debug!(key_id = %key_id, "Replaced certificate with same key id");
        }
        true
    }

    /// Insert a batch of parsed certificates, counting stored and discarded entries.
    pub fn extend(&mut self, certificates: Vec<Certificate>) -> LoadReport {
        let mut report = LoadReport::default();
        for certificate in certificates {
            if self.insert(certificate) {
                report.loaded += 1;
            } else {
                report.discarded_leaves += 1;
            }
        }
        report
    }

    /// Read one PEM file (possibly several concatenated blocks) and insert its CA certificates.
    pub fn add_pem_file(&mut self, path: &Path) -> Result<LoadReport> {
        let certificates = read_pem_file(path)?;
        Ok(self.extend(certificates))
    }

    /// Load every regular file of a directory, non-recursively.
    ///
    /// An unreadable directory fails the whole call. A file that fails to
    /// read or parse contributes nothing and is listed in the report.
    pub fn load(&mut self, directory: &Path) -> Result<LoadReport> {
        let batch = read_directory(directory)?;
        Ok(self.apply(batch))
    }

    pub(crate) fn apply(&mut self, batch: DirectoryBatch) -> LoadReport {
        let mut report = LoadReport::default();
        for (_path, certificates) in batch.files {
            report.merge(self.extend(certificates));
        }
        report.failures = batch.failures;
        report
    }

    pub fn lookup(&self, key_id: &str) -> Option<Arc<Certificate>> {
        self.certificates.get(key_id).cloned()
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.certificates.contains_key(key_id)
    }

    /// Iterate over the current entries. Each call starts a fresh pass.
    pub fn each(&self) -> impl Iterator<Item = &Arc<Certificate>> + '_ {
        self.certificates.values()
    }

    pub fn count(&self) -> usize {
        self.certificates.len()
    }

    /// Remove an entry. Removing an absent key id is a no-op.
    pub fn remove(&mut self, key_id: &str) -> Option<Arc<Certificate>> {
        self.certificates.remove(key_id)
    }

    pub fn clear(&mut self) {
        self.certificates.clear();
    }
}

/// Certificates parsed from a directory, ready to be inserted.
#[derive(Debug, Default)]
pub struct DirectoryBatch {
    pub(crate) files: Vec<(PathBuf, Vec<Certificate>)>,
    pub(crate) failures: Vec<LoadFailure>,
}

impl DirectoryBatch {
    pub fn certificate_count(&self) -> usize {
        self.files.iter().map(|(_, certs)| certs.len()).sum()
    }
}

/// Read and parse a single PEM file.
pub fn read_pem_file(path: &Path) -> Result<Vec<Certificate>> {
    let bytes = fs::read(path).map_err(|source| TrustStoreError::LoadError {
        path: path.to_path_buf(),
        source,
    })?;

    x509::parse_pem(&bytes)
        .map_err(|e| TrustStoreError::ParseError(format!("{}: {e}", path.display())))
}

/// Parse every regular file of `directory` without touching any registry.
///
/// Files are visited in path order so that same-key-id collisions resolve
/// deterministically (the last file in order wins).
pub fn read_directory(directory: &Path) -> Result<DirectoryBatch> {
    let load_error = |source| TrustStoreError::LoadError {
        path: directory.to_path_buf(),
        source,
    };

    let mut batch = DirectoryBatch::default();
    let mut paths = Vec::new();
    for entry in fs::read_dir(directory).map_err(load_error)? {
        let entry = entry.map_err(load_error)?;
        let path = entry.path();
        // `metadata` follows symlinks, so linked bundles are still loaded
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => paths.push(path),
            Ok(_) => debug!(path = %path.display(), "Skipping non-regular file"),
            Err(source) => {
                error!(path = %path.display(), error = %source, "Unreadable directory entry");
                batch.failures.push(LoadFailure {
                    path: path.clone(),
                    error: TrustStoreError::LoadError { path, source },
                });
            }
        }
    }
    paths.sort();

    for path in paths {
        match read_pem_file(&path) {
            Ok(certificates) => batch.files.push((path, certificates)),
            Err(err) => {
                error!(path = %path.display(), error = %err, "Failed to load certificate file");
                batch.failures.push(LoadFailure { path, error: err });
            }
        }
    }

    info!(
        directory = %directory.display(),
        certificates = batch.certificate_count(),
        failures = batch.failures.len(),
        "Read certificate directory"
    );

    Ok(batch)
}
