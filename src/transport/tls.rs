//! rustls server configuration for the control transports.
//!
//! Loads PEM credentials from disk and builds a [`ServerConfig`] that either
//! skips client authentication or requires a client certificate chaining to
//! the configured CA bundle.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::BootstrapError;

/// ALPN protocols advertised by the HTTP transport
pub const HTTP_ALPN: &[&[u8]] = &[b"h2", b"http/1.1"];

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, BootstrapError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BootstrapError::filesystem("open", path, e))
}

/// Read every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BootstrapError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BootstrapError::TlsConfig(format!("failed to parse {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(BootstrapError::TlsConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, BootstrapError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BootstrapError::TlsConfig(format!("failed to parse {}: {}", path.display(), e)))?
        .ok_or_else(|| BootstrapError::TlsConfig(format!("no private key found in {}", path.display())))
}

/// Build the trust store used to verify client certificates.
pub fn load_client_roots(path: &Path) -> Result<RootCertStore, BootstrapError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            BootstrapError::TlsConfig(format!("invalid CA certificate in {}: {}", path.display(), e))
        })?;
    }
    Ok(roots)
}

/// Build a server config from the credential files.
///
/// With `client_ca` set, every client must present a certificate signed by
/// one of its CAs. Without it, client certificates are not requested.
pub fn server_config(
    cert: &Path,
    key: &Path,
    client_ca: Option<&Path>,
    alpn: &[&[u8]],
) -> Result<ServerConfig, BootstrapError> {
    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| BootstrapError::TlsConfig(e.to_string()))?;

    let builder = match client_ca {
        Some(ca) => {
            let roots = load_client_roots(ca)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| BootstrapError::TlsConfig(format!("client verifier: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(load_certs(cert)?, load_private_key(key)?)
        .map_err(|e| BootstrapError::TlsConfig(format!("server certificate: {}", e)))?;
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}
