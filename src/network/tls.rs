//! TLS client configuration for the audio stream
//!
//! Built once per session from optional certificate, key and CA material.
//! Protocol versions below TLS 1.2 do not exist in rustls, so the lower bound
//! is enforced by construction; the configured minimum (TLS 1.3 unless
//! overridden) narrows it further.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{TlsSettings, TlsVersion};
use crate::error::TlsError;

/// Which side the trust material authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPurpose {
    /// A CA file was supplied: trust exactly that CA to authenticate the receiver
    ServerAuth,
    /// No CA file: fall back to the platform trust store
    ClientAuth,
}

impl TlsVersion {
    /// Strongest version the crypto stack can negotiate
    pub fn strongest_supported() -> Self {
        if rustls::ALL_VERSIONS
            .iter()
            .any(|v| v.version == rustls::ProtocolVersion::TLSv1_3)
        {
            TlsVersion::Tls13
        } else {
            TlsVersion::Tls12
        }
    }

    fn of(version: &SupportedProtocolVersion) -> Option<Self> {
        match version.version {
            rustls::ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            rustls::ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }
}

/// Immutable client configuration for one session
#[derive(Clone)]
pub struct TlsConfig {
    client: Arc<ClientConfig>,
    purpose: TlsPurpose,
    minimum_version: TlsVersion,
    check_hostname: bool,
    verify_peer: bool,
    client_identity: bool,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("purpose", &self.purpose)
            .field("minimum_version", &self.minimum_version)
            .field("check_hostname", &self.check_hostname)
            .field("verify_peer", &self.verify_peer)
            .field("client_identity", &self.client_identity)
            .finish()
    }
}

impl TlsConfig {
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client.clone()
    }

    pub fn purpose(&self) -> TlsPurpose {
        self.purpose
    }

    pub fn minimum_version(&self) -> TlsVersion {
        self.minimum_version
    }

    pub fn check_hostname(&self) -> bool {
        self.check_hostname
    }

    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    pub fn has_client_identity(&self) -> bool {
        self.client_identity
    }
}

/// Build a TLS configuration.
///
/// With `verify` the receiver's chain and host name are both checked against
/// `ca_file` (or the system store). Without it neither is checked, and a
/// warning is logged.
pub fn build(
    ca_file: Option<&Path>,
    cert_file: Option<&Path>,
    key_file: Option<&Path>,
    verify: bool,
) -> Result<TlsConfig, TlsError> {
    let mut builder = TlsContextBuilder::new(ca_file.map(Path::to_path_buf));
    if let (Some(cert), Some(key)) = (cert_file, key_file) {
        builder = builder.client_identity(cert, key);
    }
    if !verify {
        builder.disable_verification()?;
    }
    builder.build()
}

/// Build from the `[tls]` config section
pub fn from_settings(settings: &TlsSettings) -> Result<TlsConfig, TlsError> {
    let mut builder = TlsContextBuilder::new(settings.ca_file.clone());
    if let (Some(cert), Some(key)) = (&settings.cert_file, &settings.key_file) {
        builder = builder.client_identity(cert, key);
    }
    if let Some(version) = settings.minimum_version {
        builder = builder.minimum_version(version);
    }
    if !settings.verify {
        builder.disable_verification()?;
    }
    builder.build()
}

/// Step-by-step construction of a [`TlsConfig`].
///
/// Host name checking depends on peer verification: verification cannot be
/// switched off while host name checking is still on, and host name checking
/// cannot be switched on without verification.
#[derive(Debug, Clone)]
pub struct TlsContextBuilder {
    ca_file: Option<PathBuf>,
    identity: Option<(PathBuf, PathBuf)>,
    minimum_version: TlsVersion,
    check_hostname: bool,
    verify_peer: bool,
}

impl TlsContextBuilder {
    pub fn new(ca_file: Option<PathBuf>) -> Self {
        Self {
            ca_file,
            identity: None,
            minimum_version: TlsVersion::strongest_supported(),
            check_hostname: true,
            verify_peer: true,
        }
    }

    pub fn purpose(&self) -> TlsPurpose {
        if self.ca_file.is_some() {
            TlsPurpose::ServerAuth
        } else {
            TlsPurpose::ClientAuth
        }
    }

    /// Present `cert` / `key` to the receiver (mutual TLS)
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.identity = Some((cert.into(), key.into()));
        self
    }

    pub fn minimum_version(mut self, version: TlsVersion) -> Self {
        self.minimum_version = version;
        self
    }

    pub fn set_check_hostname(&mut self, enabled: bool) -> Result<(), TlsError> {
        if enabled && !self.verify_peer {
            return Err(TlsError::InvalidPosture(
                "host name checking requires peer verification",
            ));
        }
        self.check_hostname = enabled;
        Ok(())
    }

    pub fn set_verify_peer(&mut self, enabled: bool) -> Result<(), TlsError> {
        if !enabled && self.check_hostname {
            return Err(TlsError::InvalidPosture(
                "disable host name checking before peer verification",
            ));
        }
        self.verify_peer = enabled;
        Ok(())
    }

    /// Turn off host name checking, then peer verification
    pub fn disable_verification(&mut self) -> Result<(), TlsError> {
        self.set_check_hostname(false)?;
        self.set_verify_peer(false)
    }

    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if self.verify_peer && !self.check_hostname {
            return Err(TlsError::InvalidPosture(
                "verification without host name checking is not supported",
            ));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions: Vec<&'static SupportedProtocolVersion> = rustls::ALL_VERSIONS
            .iter()
            .copied()
            .filter(|v| TlsVersion::of(v).is_some_and(|ver| ver >= self.minimum_version))
            .collect();

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .map_err(|e| TlsError::Protocol(e.to_string()))?;

        let purpose = self.purpose();
        let roots = match &self.ca_file {
            Some(path) => load_ca_file(path)?,
            None if self.verify_peer => load_system_roots()?,
            None => RootCertStore::empty(),
        };

        let builder = if self.verify_peer {
            let verifier =
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(|e| TlsError::TrustStore(e.to_string()))?;
            builder.with_webpki_verifier(verifier)
        } else {
            tracing::warn!("TLS verification disabled: the receiver's identity is NOT checked");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification { crypto: provider }))
        };

        let client = match &self.identity {
            Some((cert, key)) => {
                let chain = load_certificates(cert)?;
                let key = load_private_key(key)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| TlsError::PrivateKey(e.to_string()))?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(TlsConfig {
            client: Arc::new(client),
            purpose,
            minimum_version: self.minimum_version,
            check_hostname: self.check_hostname,
            verify_peer: self.verify_peer,
            client_identity: self.identity.is_some(),
        })
    }
}

/// Target host as the expected certificate identity
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|e| TlsError::Protocol(e.to_string()))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(TlsError::Certificate(format!("{}: no certificates", path.display())));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| TlsError::PrivateKey(format!("{}: {}", path.display(), e)))
}

fn load_ca_file(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::TrustStore(format!("{}: {}", path.display(), e)))?;
    }
    Ok(roots)
}

fn load_system_roots() -> Result<RootCertStore, TlsError> {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::debug!("Skipping system certificate: {}", error);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!("Loaded {} system root certificates ({} ignored)", added, ignored);

    if roots.is_empty() {
        return Err(TlsError::TrustStore("system trust store is empty".into()));
    }
    Ok(roots)
}

/// Accepts any certificate; signatures are still checked so the handshake
/// itself stays well-formed
#[derive(Debug)]
struct NoVerification {
    crypto: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.crypto.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.crypto
            .signature_verification_algorithms
            .supported_schemes()
    }
}
