//! TLS configuration: load listener certificates from files, build client
//! configs for the upstream leg.

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Build a rustls ServerConfig from PEM certificate and key file paths.
pub fn load_server_config_from_files(
    cert_file: &str,
    key_file: &str,
) -> Result<Arc<rustls::ServerConfig>> {
    let certs = load_certs_from_file(cert_file)?;
    let key = load_private_key_from_file(key_file)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Build ServerConfig from cert and key")?;
    Ok(Arc::new(config))
}

fn load_certs_from_file(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path).with_context(|| format!("Open cert file: {}", path))?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Parse PEM certificates")?;
    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }
    Ok(certs)
}

fn load_private_key_from_file(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path).with_context(|| format!("Open key file: {}", path))?;
    let mut reader = BufReader::new(file);
    let pkcs8: Vec<_> = pkcs8_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Parse PEM PKCS8 keys")?;
    if let Some(key) = pkcs8.into_iter().next() {
        return Ok(key.into());
    }
    let file = fs::File::open(path).with_context(|| format!("Open key file: {}", path))?;
    let mut reader = BufReader::new(file);
    let rsa: Vec<_> = rsa_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Parse PEM RSA keys")?;
    rsa.into_iter()
        .next()
        .map(Into::into)
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", path))
}

/// Check that cert and key files exist and are loadable (for startup validation).
pub fn validate_tls_files(cert_file: &str, key_file: &str) -> Result<()> {
    if !Path::new(cert_file).exists() {
        anyhow::bail!("TLS cert file not found: {}", cert_file);
    }
    if !Path::new(key_file).exists() {
        anyhow::bail!("TLS key file not found: {}", key_file);
    }
    load_server_config_from_files(cert_file, key_file)?;
    Ok(())
}

/// Verifier that accepts any server certificate. Only for use with skip_verify.
#[derive(Debug)]
struct InsecureServerVerifier;

impl ServerCertVerifier for InsecureServerVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// Build a TLS client config that skips server certificate verification.
pub fn tls_client_config_insecure() -> Result<Arc<ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().context("Load system CA certs")? {
        let _ = root_store.add(cert);
    }
    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(InsecureServerVerifier));
    Ok(Arc::new(config))
}

/// Build the default TLS client config with system root certificates, plus an
/// optional extra CA bundle.
pub fn default_tls_client_config_with_ca(extra_ca_pem: Option<&[u8]>) -> Result<Arc<ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().context("Load system CA certs")? {
        let _ = root_store.add(cert);
    }
    if let Some(pem) = extra_ca_pem {
        for cert in rustls_pemfile::certs(&mut std::io::Cursor::new(pem)) {
            let cert = cert.map_err(|e| anyhow::anyhow!("Parse CA PEM: {}", e))?;
            let _ = root_store.add(cert);
        }
    }
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
