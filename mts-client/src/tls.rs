//! TLS connectors for the two login phases.
//!
//! The password phase runs without server verification because the client
//! has no trust anchor yet. The certificate phase presents the certificate
//! issued by the password login and verifies the server.

use crate::config::TlsConfig;
use crate::error::ClientError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Creates a connector that skips server certificate verification.
pub fn create_insecure_connector(
    config: &TlsConfig,
    server_host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ClientError> {
    let client_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier::NoVerification))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(client_config));
    Ok((connector, server_name(config, server_host)?))
}

/// Creates a mutual-TLS connector presenting the issued certificate.
pub fn create_client_cert_connector(
    config: &TlsConfig,
    server_host: &str,
    issued: &[u8],
) -> Result<(TlsConnector, ServerName<'static>), ClientError> {
    let (chain, bundled_key) = parse_issued_certificate(issued)?;

    let key = match bundled_key {
        Some(key) => key,
        None => match config.client_key_path {
            Some(ref path) => load_private_key(path)?,
            None => {
                return Err(ClientError::TlsConfig(
                    "issued certificate carries no private key and tls.client_key_path is not set"
                        .to_string(),
                ))
            }
        },
    };

    let mut root_store = RootCertStore::empty();
    if let Some(ref ca_path) = config.ca_cert_path {
        for cert in load_certs(ca_path)? {
            root_store
                .add(cert)
                .map_err(|e| ClientError::TlsConfig(format!("invalid CA cert: {}", e)))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    if config.trust_issued_certificate {
        let (added, ignored) = root_store.add_parsable_certificates(chain.iter().cloned());
        tracing::debug!("Trusting issued chain: {} added, {} ignored", added, ignored);
    }

    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_client_auth_cert(chain, key)
        .map_err(|e| ClientError::TlsConfig(format!("invalid client cert/key: {}", e)))?;

    let connector = TlsConnector::from(Arc::new(client_config));
    Ok((connector, server_name(config, server_host)?))
}

fn server_name(config: &TlsConfig, server_host: &str) -> Result<ServerName<'static>, ClientError> {
    let name = config.server_name.as_deref().unwrap_or(server_host);
    ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {}", name)))
}

/// Splits the certificate issued at login into a chain and an optional key.
///
/// PEM input may hold several certificates and one private key. Input with
/// no PEM sections is taken as a single DER certificate.
pub fn parse_issued_certificate(
    issued: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, Option<PrivateKeyDer<'static>>), ClientError> {
    if issued.is_empty() {
        return Err(ClientError::TlsConfig("issued certificate is empty".to_string()));
    }

    let mut chain = Vec::new();
    let mut key = None;
    let mut reader = issued;
    for item in rustls_pemfile::read_all(&mut reader) {
        let item = item
            .map_err(|e| ClientError::TlsConfig(format!("invalid issued certificate: {}", e)))?;
        match item {
            rustls_pemfile::Item::X509Certificate(cert) => chain.push(cert),
            rustls_pemfile::Item::Pkcs1Key(k) if key.is_none() => key = Some(k.into()),
            rustls_pemfile::Item::Pkcs8Key(k) if key.is_none() => key = Some(k.into()),
            rustls_pemfile::Item::Sec1Key(k) if key.is_none() => key = Some(k.into()),
            _ => {}
        }
    }

    if chain.is_empty() {
        if key.is_some() {
            return Err(ClientError::TlsConfig(
                "issued certificate bundle has a key but no certificate".to_string(),
            ));
        }
        chain.push(CertificateDer::from(issued.to_vec()));
    }

    Ok((chain, key))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClientError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        .ok_or_else(|| ClientError::TlsConfig(format!("no private key found in {:?}", path)))
}

mod verifier {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate. Signatures are still checked by the
    /// default crypto provider so the session keys stay bound to the peer.
    #[derive(Debug)]
    pub(super) struct NoVerification;

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _: &CertificateDer<'_>,
            _: &[CertificateDer<'_>],
            _: &ServerName<'_>,
            _: &[u8],
            _: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(message, cert, dss, &algorithms())
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(message, cert, dss, &algorithms())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            algorithms().supported_schemes()
        }
    }

    fn algorithms() -> rustls::crypto::WebPkiSupportedAlgorithms {
        rustls::crypto::CryptoProvider::get_default()
            .map(|provider| provider.signature_verification_algorithms)
            .unwrap_or_else(|| {
                rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms
            })
    }
}
