//! Revocation tracking over HTTP
//!
//! A one-route HTTP server on loopback serves whatever CRL the test last
//! published, so the reqwest fetcher, the CRL parser and the tracker are
//! exercised together.

use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DnType, IsCa,
    KeyIdMethod, KeyPair, RevokedCertParams,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use trust_store::*;

struct CrlServer {
    url: String,
    body: Arc<RwLock<(u16, Vec<u8>)>>,
}

impl CrlServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/issuing.crl", listener.local_addr().unwrap());
        let body = Arc::new(RwLock::new((404u16, Vec::new())));

        let served = Arc::clone(&body);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let mut request = vec![0u8; 4096];
                    let _ = socket.read(&mut request).await;

                    let (status, payload) = served.read().await.clone();
                    let reason = if status == 200 { "OK" } else { "Not Found" };
                    let head = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/pkix-crl\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        payload.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&payload).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { url, body }
    }

    async fn publish(&self, der: Vec<u8>) {
        *self.body.write().await = (200, der);
    }

    async fn fail(&self) {
        *self.body.write().await = (503, Vec::new());
    }
}

struct Issuer {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Issuer {
    fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "Revoking CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn certificate(&self) -> Certificate {
        x509::parse_pem(self.cert.pem().as_bytes()).unwrap().remove(0)
    }

    fn crl(&self, serials: &[u64]) -> Vec<u8> {
        let now = time::OffsetDateTime::now_utc();
        let revoked_certs = serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: rcgen::SerialNumber::from(*serial),
                revocation_time: now,
                reason_code: None,
                invalidity_date: None,
            })
            .collect();

        CertificateRevocationListParams {
            this_update: now,
            next_update: now + time::Duration::days(7),
            crl_number: rcgen::SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&self.cert, &self.key)
        .unwrap()
        .der()
        .to_vec()
    }
}

async fn create_tracker() -> (RevocationTracker, CrlServer, Issuer, AuthorityRecord) {
    let server = CrlServer::start().await;
    let issuer = Issuer::new();

    // Loopback only; ignore any proxy configured in the environment
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .unwrap();
    let fetcher = HttpRevocationListFetcher::with_client(client);
    let tracker = RevocationTracker::new(
        Arc::new(InMemoryAuthorityRepository::new()),
        Arc::new(fetcher),
    );

    let authority = tracker.track(&issuer.certificate(), None).await.unwrap();
    tracker
        .set_revocation_list_url(&authority, &server.url)
        .await
        .unwrap();

    (tracker, server, issuer, authority)
}

fn serial(value: u64) -> SerialNumber {
    SerialNumber::from(value)
}

#[tokio::test]
async fn test_revocation_list_grows_without_duplicates() {
    let (tracker, server, issuer, authority) = create_tracker().await;

    server.publish(issuer.crl(&[5, 7])).await;
    let first = tracker.refresh(&authority).await.unwrap();
    assert_eq!(first.added, vec![serial(5), serial(7)]);
    assert!(tracker.is_revoked(&authority, &serial(7)).await.unwrap());
    assert!(!tracker.is_revoked(&authority, &serial(9)).await.unwrap());

    server.publish(issuer.crl(&[5, 7, 9])).await;
    let second = tracker.refresh(&authority).await.unwrap();
    assert_eq!(second.added, vec![serial(9)]);
    assert!(tracker.is_revoked(&authority, &serial(9)).await.unwrap());
    assert_eq!(tracker.revoked_serials(&authority).await.unwrap().len(), 3);

    let by_key_id = tracker
        .is_revoked_by_key_id(&authority.key_id, &serial(5))
        .await
        .unwrap();
    assert!(by_key_id);
}

#[tokio::test]
async fn test_http_failure_preserves_known_serials() {
    let (tracker, server, issuer, authority) = create_tracker().await;

    server.publish(issuer.crl(&[1, 2])).await;
    tracker.refresh(&authority).await.unwrap();

    server.fail().await;
    let err = tracker.refresh(&authority).await.unwrap_err();
    assert!(matches!(err, TrustStoreError::RetrievalError { .. }));
    assert_eq!(tracker.revoked_serials(&authority).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unparseable_payload_is_retrieval_error() {
    let (tracker, server, _issuer, authority) = create_tracker().await;

    server.publish(b"<html>maintenance</html>".to_vec()).await;
    let err = tracker.refresh(&authority).await.unwrap_err();
    assert!(err.is_retrieval());
}

#[tokio::test]
async fn test_refresh_all_reaches_http_authorities() {
    let (tracker, server, issuer, _authority) = create_tracker().await;
    server.publish(issuer.crl(&[3])).await;

    let report = tracker.refresh_all().await.unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.added_count(), 1);
}
