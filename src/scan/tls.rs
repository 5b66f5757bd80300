use crate::probe::Probe;
use crate::scan::{cdn, describe_error};
use crate::target::Target;
use crate::types::{Classification, ProbeMode, ProbeOutcome, RESPONDED};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    V1_2,
    V1_3,
}

impl TlsVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::V1_2 => "TLSv1.2",
            TlsVersion::V1_3 => "TLSv1.3",
        }
    }

    fn from_rustls(version: Option<rustls::ProtocolVersion>) -> Option<Self> {
        match version {
            Some(rustls::ProtocolVersion::TLSv1_2) => Some(TlsVersion::V1_2),
            Some(rustls::ProtocolVersion::TLSv1_3) => Some(TlsVersion::V1_3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Handshake {
    version: Option<TlsVersion>,
    issuer: Option<String>,
}

impl Handshake {
    fn version_str(&self) -> &'static str {
        self.version.map(|v| v.as_str()).unwrap_or("TLS")
    }
}

#[derive(Debug)]
enum HandshakeFailure {
    /// The target cannot be expressed as a TLS server name.
    InvalidName(String),
    Network(String),
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// System trust store, falling back to the bundled Mozilla roots when the
/// platform store is empty or unreadable.
fn root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        log::debug!("[scan::tls] native_cert_error: error={}", error);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    log::debug!("[scan::tls] native_roots_loaded: added={} ignored={}", added, ignored);

    if roots.is_empty() {
        log::warn!("[scan::tls] native_roots_empty: falling back to webpki roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Accepts any certificate chain. Handshake signatures are still checked, so
/// the peer must hold the key for whatever certificate it presents.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn verified_connector() -> Result<TlsConnector> {
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .wrap_err("Failed to select TLS protocol versions")?
        .with_root_certificates(root_store())
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

fn unverified_connector() -> Result<TlsConnector> {
    let provider = crypto_provider();
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .wrap_err("Failed to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

fn certificate_issuer(der: &CertificateDer<'_>) -> Option<String> {
    match x509_parser::parse_x509_certificate(der.as_ref()) {
        Ok((_, certificate)) => Some(certificate.issuer().to_string()),
        Err(e) => {
            log::debug!("[scan::tls] certificate_parse_failed: error={}", e);
            None
        }
    }
}

/// TCP connect plus TLS handshake, both inside one `limit`.
async fn handshake(
    connector: &TlsConnector,
    target: &Target,
    port: u16,
    limit: Duration,
) -> Result<Handshake, HandshakeFailure> {
    let server_name = ServerName::try_from(target.to_string())
        .map_err(|e| HandshakeFailure::InvalidName(format!("invalid server name {}: {}", target, e)))?;
    let addr = target.authority(port);

    let attempt = tokio::time::timeout(limit, async {
        let socket = TcpStream::connect(&addr).await?;
        connector.connect(server_name, socket).await
    })
    .await;

    let stream = match attempt {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(HandshakeFailure::Network(describe_error(&e))),
        Err(_) => {
            return Err(HandshakeFailure::Network(format!(
                "handshake timed out after {}ms",
                limit.as_millis()
            )));
        }
    };

    let (_, connection) = stream.get_ref();
    let issuer = connection
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(certificate_issuer);

    Ok(Handshake {
        version: TlsVersion::from_rustls(connection.protocol_version()),
        issuer,
    })
}

fn failure_outcome(target: &Target, failure: HandshakeFailure) -> ProbeOutcome {
    match failure {
        HandshakeFailure::InvalidName(reason) => ProbeOutcome::error(target.clone(), reason),
        HandshakeFailure::Network(reason) => ProbeOutcome::negative(target.clone(), reason),
    }
}

/// Completed handshake reported with the leaf issuer; an issuer naming a
/// CDN marks the outcome as CDN-flavored.
fn issuer_outcome(target: &Target, handshake: &Handshake) -> ProbeOutcome {
    let issuer = handshake.issuer.as_deref().unwrap_or("unknown");
    ProbeOutcome::new(target.clone(), RESPONDED, Classification::Positive)
        .with_banner(handshake.version_str())
        .with_cdn(cdn::is_cdn(issuer))
        .with_extra(format!("issuer: {}", issuer))
}

/// Verified handshake with the target as SNI; records the leaf issuer.
pub struct SniProbe {
    connector: TlsConnector,
}

impl SniProbe {
    pub fn new() -> Result<Self> {
        log::debug!("[scan::tls] new: mode=sni");
        Ok(Self {
            connector: verified_connector()?,
        })
    }
}

#[async_trait]
impl Probe for SniProbe {
    fn mode(&self) -> ProbeMode {
        ProbeMode::Sni
    }

    async fn probe(&self, target: &Target, port: u16, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        match handshake(&self.connector, target, port, timeout).await {
            Ok(handshake) => {
                log::trace!("[scan::tls] sni_handshake_ok: target={} port={} version={} issuer={:?} duration={}ms",
                    target, port, handshake.version_str(), handshake.issuer, start.elapsed().as_millis());
                issuer_outcome(target, &handshake)
            }
            Err(failure) => {
                log::trace!("[scan::tls] sni_handshake_failed: target={} port={} duration={}ms failure={:?}",
                    target, port, start.elapsed().as_millis(), failure);
                failure_outcome(target, failure)
            }
        }
    }
}

/// Handshake that accepts any certificate.
pub struct SslProbe {
    connector: TlsConnector,
}

impl SslProbe {
    pub fn new() -> Result<Self> {
        log::debug!("[scan::tls] new: mode=ssl");
        Ok(Self {
            connector: unverified_connector()?,
        })
    }
}

#[async_trait]
impl Probe for SslProbe {
    fn mode(&self) -> ProbeMode {
        ProbeMode::Ssl
    }

    async fn probe(&self, target: &Target, port: u16, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        match handshake(&self.connector, target, port, timeout).await {
            Ok(handshake) => {
                log::trace!("[scan::tls] ssl_handshake_ok: target={} port={} version={} duration={}ms",
                    target, port, handshake.version_str(), start.elapsed().as_millis());
                ProbeOutcome::new(target.clone(), RESPONDED, Classification::Positive)
                    .with_banner(handshake.version_str())
                    .with_extra("ssl connection ok")
            }
            Err(failure) => {
                log::trace!("[scan::tls] ssl_handshake_failed: target={} port={} duration={}ms failure={:?}",
                    target, port, start.elapsed().as_millis(), failure);
                failure_outcome(target, failure)
            }
        }
    }
}
