//! Server credential provisioning.
//!
//! The node must hold a certificate/key pair before any transport starts. On
//! first run the pair is generated and written to the configured paths; once
//! both files exist they are never rewritten, since a control plane may have
//! pinned the certificate.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rcgen::{CertificateParams, DnType, KeyPair};
use time::{Duration, OffsetDateTime};

use crate::config::TlsSettings;
use crate::error::BootstrapError;

/// Locations of the server certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CredentialPaths {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    pub fn from_settings(tls: &TlsSettings) -> Self {
        Self::new(&tls.cert_file, &tls.key_file)
    }
}

/// PEM-encoded output of a credential generator.
#[derive(Debug, Clone)]
pub struct GeneratedPem {
    pub cert: String,
    pub key: String,
}

/// Produces a fresh certificate and private key.
pub trait CredentialGenerator {
    fn generate(&self) -> Result<GeneratedPem, BootstrapError>;
}

/// Self-signed certificate generator backed by rcgen.
#[derive(Debug, Clone)]
pub struct SelfSignedGenerator {
    common_name: String,
    subject_alt_names: Vec<String>,
    validity_days: u32,
}

impl SelfSignedGenerator {
    pub fn new(common_name: impl Into<String>, subject_alt_names: Vec<String>, validity_days: u32) -> Self {
        Self {
            common_name: common_name.into(),
            subject_alt_names,
            validity_days,
        }
    }

    pub fn from_settings(tls: &TlsSettings) -> Self {
        Self::new(
            tls.common_name.clone(),
            tls.subject_alt_names.clone(),
            tls.validity_days,
        )
    }
}

impl CredentialGenerator for SelfSignedGenerator {
    fn generate(&self) -> Result<GeneratedPem, BootstrapError> {
        let generation = |e: rcgen::Error| BootstrapError::CredentialGeneration(e.to_string());

        let mut params = CertificateParams::new(self.subject_alt_names.clone()).map_err(generation)?;
        params
            .distinguished_name
            .push(DnType::CommonName, self.common_name.clone());
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(i64::from(self.validity_days));

        let key_pair = KeyPair::generate().map_err(generation)?;
        let cert = params.self_signed(&key_pair).map_err(generation)?;

        Ok(GeneratedPem {
            cert: cert.pem(),
            key: key_pair.serialize_pem(),
        })
    }
}

/// The server credential as it exists on disk.
#[derive(Debug, Clone)]
pub struct ServerCredential {
    pub paths: CredentialPaths,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    /// Whether this run produced the pair
    pub generated: bool,
}

/// Checks for, and lazily generates, the server credential.
pub struct CertificateStore<G> {
    paths: CredentialPaths,
    generator: G,
}

impl<G: CredentialGenerator> CertificateStore<G> {
    pub fn new(paths: CredentialPaths, generator: G) -> Self {
        Self { paths, generator }
    }

    /// Make sure both credential files exist, generating them if either is
    /// missing. Existing files are read but never modified.
    pub fn ensure_server_credential(&self) -> Result<ServerCredential, BootstrapError> {
        let CredentialPaths { cert, key } = &self.paths;

        if cert.is_file() && key.is_file() {
            let cert_pem = read_non_empty(cert)?;
            let key_pem = read_non_empty(key)?;
            tracing::debug!(cert = %cert.display(), key = %key.display(), "Using existing server credential");
            return Ok(ServerCredential {
                paths: self.paths.clone(),
                cert_pem,
                key_pem,
                generated: false,
            });
        }

        tracing::info!(
            cert = %cert.display(),
            key = %key.display(),
            "Server credential missing, generating self-signed certificate"
        );
        let pems = self.generator.generate()?;

        write_file(key, pems.key.as_bytes(), true)?;
        write_file(cert, pems.cert.as_bytes(), false)?;

        Ok(ServerCredential {
            paths: self.paths.clone(),
            cert_pem: pems.cert.into_bytes(),
            key_pem: pems.key.into_bytes(),
            generated: true,
        })
    }
}

fn read_non_empty(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    let bytes = fs::read(path).map_err(|e| BootstrapError::filesystem("read", path, e))?;
    if bytes.is_empty() {
        return Err(BootstrapError::filesystem(
            "use",
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "credential file is empty"),
        ));
    }
    Ok(bytes)
}

fn write_file(path: &Path, contents: &[u8], private: bool) -> Result<(), BootstrapError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| BootstrapError::filesystem("create directory", parent, e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(path)
        .map_err(|e| BootstrapError::filesystem("open", path, e))?;
    file.write_all(contents)
        .map_err(|e| BootstrapError::filesystem("write", path, e))?;
    Ok(())
}
