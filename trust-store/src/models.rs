use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::TrustStoreError;

/// Parsed X.509 certificate as seen by the trust store.
///
/// Values are immutable once built. Only CA-capable certificates are ever
/// held by the registry; leaf certificates are passed in by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Stable identifier (subject key identifier, or SPKI digest)
    pub key_id: String,
    /// Key id of the certificate that signed this one; `None` when unknown or self-signed
    pub signing_key_id: Option<String>,
    pub subject_dn: String,
    pub issuer_dn: String,
    pub serial: SerialNumber,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    /// CRL distribution point URIs
    pub crl_urls: Vec<String>,
    pub fingerprint_sha256: String,
}

impl Certificate {
    pub fn new(
        key_id: &str,
        subject_dn: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        is_ca: bool,
    ) -> Self {
        Self {
            key_id: key_id.to_string(),
            signing_key_id: None,
            subject_dn: subject_dn.to_string(),
            issuer_dn: subject_dn.to_string(),
            serial: SerialNumber::from(0u64),
            not_before,
            not_after,
            is_ca,
            crl_urls: Vec::new(),
            fingerprint_sha256: String::new(),
        }
    }

    pub fn with_signing_key_id(mut self, signing_key_id: &str) -> Self {
        self.signing_key_id = Some(signing_key_id.to_string());
        self
    }

    pub fn with_issuer_dn(mut self, issuer_dn: &str) -> Self {
        self.issuer_dn = issuer_dn.to_string();
        self
    }

    pub fn with_serial(mut self, serial: SerialNumber) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_crl_url(mut self, url: &str) -> Self {
        self.crl_urls.push(url.to_string());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint_sha256: &str) -> Self {
        self.fingerprint_sha256 = fingerprint_sha256.to_string();
        self
    }

    /// Self-signed means no distinct signer: the signing key id is absent or our own.
    pub fn is_self_signed(&self) -> bool {
        self.signing_key_id
            .as_deref()
            .map_or(true, |signer| signer == self.key_id)
    }

    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject_dn, self.key_id)
    }
}

/// Certificate serial number, normalized to lowercase hex without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Parse a hex serial. Accepts `0x` prefixes, `:` separators and any case.
    pub fn from_hex(value: &str) -> Result<Self, TrustStoreError> {
        let trimmed = value.trim();
        let digits: String = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed)
            .chars()
            .filter(|c| *c != ':')
            .collect();

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TrustStoreError::ParseError(format!(
                "invalid serial number: {value}"
            )));
        }

        let normalized = digits.trim_start_matches('0').to_ascii_lowercase();
        if normalized.is_empty() {
            Ok(Self("0".to_string()))
        } else {
            Ok(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for SerialNumber {
    fn from(value: u64) -> Self {
        Self(format!("{value:x}"))
    }
}

impl TryFrom<String> for SerialNumber {
    type Error = TrustStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<SerialNumber> for String {
    fn from(value: SerialNumber) -> Self {
        value.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable record of a certificate authority tracked for revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub id: Uuid,
    pub key_id: String,
    pub subject_dn: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub revocation_list_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorityRecord {
    pub fn new(
        key_id: &str,
        subject_dn: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key_id: key_id.to_string(),
            subject_dn: subject_dn.to_string(),
            not_before,
            not_after,
            revocation_list_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl fmt::Display for AuthorityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject_dn, self.key_id)
    }
}

/// Parsed certificate revocation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationList {
    pub issuer_dn: String,
    pub this_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub serials: Vec<SerialNumber>,
}

impl RevocationList {
    pub fn from_serials(serials: Vec<SerialNumber>) -> Self {
        Self {
            issuer_dn: String::new(),
            this_update: None,
            next_update: None,
            serials,
        }
    }
}

/// Kinds of anomaly reported to the alert sink during chain evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A signer outside its validity window was walked through
    ExpiredCertificate,
    /// The signer graph loops or is deeper than the configured limit
    ChainDepthExceeded,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpiredCertificate => f.write_str("expired_certificate"),
            Self::ChainDepthExceeded => f.write_str("chain_depth_exceeded"),
        }
    }
}

/// Per-file failure recorded during a directory load.
#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: TrustStoreError,
}

/// Outcome of loading certificates into the registry.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// CA certificates inserted (including overwrites of an existing key id)
    pub loaded: usize,
    /// Non-CA certificates dropped
    pub discarded_leaves: usize,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn merge(&mut self, other: LoadReport) {
        self.loaded += other.loaded;
        self.discarded_leaves += other.discarded_leaves;
        self.failures.extend(other.failures);
    }
}

/// Result of one revocation list refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub authority_key_id: String,
    /// Serials present in the fetched list
    pub fetched: usize,
    /// Serials not previously known, now stored
    pub added: Vec<SerialNumber>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_serial_normalization() {
        assert_eq!(SerialNumber::from_hex("0x00AB").unwrap().as_str(), "ab");
        assert_eq!(SerialNumber::from_hex("01:0f").unwrap().as_str(), "10f");
        assert_eq!(SerialNumber::from_hex("0000").unwrap().as_str(), "0");
        assert_eq!(SerialNumber::from(255u64), SerialNumber::from_hex("FF").unwrap());
        assert!(SerialNumber::from_hex("xyz").is_err());
        assert!(SerialNumber::from_hex("").is_err());
    }

    #[test]
    fn test_serial_deserialization_normalizes() {
        let serial: SerialNumber = serde_json::from_str("\"0x0A\"").unwrap();
        assert_eq!(serial.as_str(), "a");
        assert_eq!(serde_json::to_string(&serial).unwrap(), "\"a\"");
        assert!(serde_json::from_str::<SerialNumber>("\"zz\"").is_err());
    }

    #[test]
    fn test_self_signed_detection() {
        let now = Utc::now();
        let root = Certificate::new("R1", "CN=Root", now, now + Duration::days(1), true);
        assert!(root.is_self_signed());
        assert!(root.clone().with_signing_key_id("R1").is_self_signed());
        assert!(!root.with_signing_key_id("X9").is_self_signed());
    }

    #[test]
    fn test_validity_window_is_inclusive() {
        let now = Utc::now();
        let cert = Certificate::new("K", "CN=K", now, now + Duration::hours(1), true);
        assert!(cert.is_within_validity(now));
        assert!(cert.is_within_validity(now + Duration::hours(1)));
        assert!(!cert.is_within_validity(now - Duration::seconds(1)));
        assert!(!cert.is_within_validity(now + Duration::hours(2)));
    }
}
