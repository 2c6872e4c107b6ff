//! X.509 adapter: turns PEM/DER material into [`Certificate`] and
//! [`RevocationList`] values.
//!
//! Key ids come from the Subject Key Identifier extension when present and
//! fall back to a SHA-256 digest of the SubjectPublicKeyInfo, so the same
//! certificate bytes always produce the same key id.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::error::{Result, TrustStoreError};
use crate::models::{Certificate, RevocationList, SerialNumber};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";
const CRL_LABEL: &str = "X509 CRL";

/// Parse every certificate block of a PEM bundle.
///
/// Non-certificate blocks (keys, CRLs) are skipped. A bundle containing no
/// certificate at all is an error.
pub fn parse_pem(bytes: &[u8]) -> Result<Vec<Certificate>> {
    let mut certificates = Vec::new();

    for maybe_pem in Pem::iter_from_buffer(bytes) {
        let pem = maybe_pem
            .map_err(|e| TrustStoreError::ParseError(format!("malformed PEM block: {e}")))?;

        if pem.label != CERTIFICATE_LABEL {
            tracing::debug!(label = %pem.label, "Skipping non-certificate PEM block");
            continue;
        }

        certificates.push(parse_der(&pem.contents)?);
    }

    if certificates.is_empty() {
        return Err(TrustStoreError::ParseError(
            "no certificate found in PEM data".to_string(),
        ));
    }

    Ok(certificates)
}

/// Parse a single DER-encoded certificate.
pub fn parse_der(der: &[u8]) -> Result<Certificate> {
    let (_rem, cert) = X509Certificate::from_der(der)
        .map_err(|e| TrustStoreError::ParseError(format!("invalid X.509 certificate: {e}")))?;

    let mut subject_key_id = None;
    let mut authority_key_id = None;
    let mut crl_urls = Vec::new();

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(skid) => {
                subject_key_id = Some(hex::encode(skid.0));
            }
            ParsedExtension::AuthorityKeyIdentifier(akid) => {
                authority_key_id = akid.key_identifier.as_ref().map(|kid| hex::encode(kid.0));
            }
            ParsedExtension::CRLDistributionPoints(cdp) => {
                for point in &cdp.points {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_urls.push((*uri).to_string());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let key_id =
        subject_key_id.unwrap_or_else(|| hex::encode(Sha256::digest(cert.public_key().raw)));

    let is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);

    Ok(Certificate {
        key_id,
        signing_key_id: authority_key_id,
        subject_dn: cert.subject().to_string(),
        issuer_dn: cert.issuer().to_string(),
        serial: SerialNumber::from_hex(&cert.serial.to_str_radix(16))?,
        not_before: to_utc(cert.validity().not_before.timestamp())?,
        not_after: to_utc(cert.validity().not_after.timestamp())?,
        is_ca,
        crl_urls,
        fingerprint_sha256: hex::encode(Sha256::digest(der)),
    })
}

/// Parse a CRL given as PEM (`X509 CRL` block) or raw DER.
pub fn parse_revocation_list(bytes: &[u8]) -> Result<RevocationList> {
    if looks_like_pem(bytes) {
        for maybe_pem in Pem::iter_from_buffer(bytes) {
            let pem = maybe_pem
                .map_err(|e| TrustStoreError::ParseError(format!("malformed PEM block: {e}")))?;
            if pem.label == CRL_LABEL {
                return parse_revocation_list_der(&pem.contents);
            }
        }
        return Err(TrustStoreError::ParseError(
            "no X509 CRL block found in PEM data".to_string(),
        ));
    }

    parse_revocation_list_der(bytes)
}

fn parse_revocation_list_der(der: &[u8]) -> Result<RevocationList> {
    let (_rem, crl) = CertificateRevocationList::from_der(der)
        .map_err(|e| TrustStoreError::ParseError(format!("invalid revocation list: {e}")))?;

    let serials = crl
        .iter_revoked_certificates()
        .map(|revoked| SerialNumber::from_hex(&revoked.serial().to_str_radix(16)))
        .collect::<Result<Vec<_>>>()?;

    Ok(RevocationList {
        issuer_dn: crl.issuer().to_string(),
        this_update: Some(to_utc(crl.last_update().timestamp())?),
        next_update: crl
            .next_update()
            .map(|next| to_utc(next.timestamp()))
            .transpose()?,
        serials,
    })
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes.get(start..).is_some_and(|rest| rest.starts_with(b"-----BEGIN"))
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| TrustStoreError::ParseError(format!("timestamp out of range: {timestamp}")))
}
