//! Certificate-authority trust store for RustCare Engine
//!
//! This crate keeps the working set of CA certificates and answers trust
//! questions about certificates presented to it:
//! - Bulk loading of PEM bundles from a directory, keyed by key id
//! - Chain-of-trust walking from a certificate up to a configured trusted root
//! - Validity checks and pruning of certificates that no longer chain
//! - Revocation tracking per authority, fed by published revocation lists
//!
//! # Core Concepts
//!
//! - **Key id**: stable identifier of a certificate (subject key identifier,
//!   or the SHA-256 of the public key when the extension is absent)
//! - **Trusted roots**: the configured key ids accepted as trust anchors; a
//!   self-signed certificate is never trusted on its own
//! - **Chain**: signers from the immediate issuer up to and including a root
//! - **Authority record**: durable per-CA state holding the revocation list
//!   location and the serials known to be revoked
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use trust_store::{Certificate, TracingAlertSink, TrustStore};
//!
//! let store = TrustStore::new(Arc::new(TracingAlertSink));
//! store.reload_trusted_roots(["R1"]);
//!
//! let now = Utc::now();
//! let year = Duration::days(365);
//! store.insert(Certificate::new("R1", "CN=Root", now - year, now + year, true));
//! store.insert(
//!     Certificate::new("I1", "CN=Intermediate", now - year, now + year, true)
//!         .with_signing_key_id("R1"),
//! );
//!
//! let leaf = Certificate::new("L1", "CN=service", now - year, now + year, false)
//!     .with_signing_key_id("I1");
//! let chain: Vec<String> = store.chain(&leaf).iter().map(|c| c.key_id.clone()).collect();
//! assert_eq!(chain, ["I1", "R1"]);
//! assert!(store.is_valid(&leaf));
//! ```

pub mod alerts;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod fetcher;
pub mod models;
pub mod registry;
pub mod repository;
pub mod revocation;
pub mod store;
pub mod x509;

pub use alerts::{AlertError, AlertSink, Anomaly, ChannelAlertSink, TracingAlertSink};
pub use config::{LoggingConfig, RevocationConfig, TrustStoreConfig};
pub use error::{Result, TrustStoreError};
pub use evaluator::{TrustEvaluator, TrustedRoots, DEFAULT_MAX_CHAIN_DEPTH};
pub use fetcher::{HttpRevocationListFetcher, RevocationListFetcher};
pub use models::*;
pub use registry::CertificateRegistry;
pub use repository::{AuthorityRepository, InMemoryAuthorityRepository, PostgresAuthorityRepository};
pub use revocation::{RefreshReport, RevocationTracker};
pub use store::TrustStore;
