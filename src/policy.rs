//! TLS policy resolution.
//!
//! Turns the TLS settings into one of three policies. The RPC and HTTP
//! transports differ in how strict they are about the client CA bundle:
//! RPC accepts a missing bundle (with a warning) and runs [`TlsPolicy::ServerOnly`],
//! while HTTP refuses to start without one unless TLS is disabled outright.

use std::path::{Path, PathBuf};

use crate::certificate::CredentialPaths;
use crate::config::TlsSettings;
use crate::error::BootstrapError;
use crate::transport::ServiceProtocol;

/// Effective TLS policy for the control transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// TLS is terminated upstream; no client identity check here.
    Disabled,
    /// Server certificate only, no client trust anchor. RPC only.
    ServerOnly { credential: CredentialPaths },
    /// Clients must present a certificate signed by `client_ca`.
    MutualRequired {
        credential: CredentialPaths,
        client_ca: PathBuf,
    },
}

impl TlsPolicy {
    /// Short label used in startup logs.
    pub fn describe(&self) -> &'static str {
        match self {
            TlsPolicy::Disabled => "TLS disabled",
            TlsPolicy::ServerOnly { .. } => "server-only TLS",
            TlsPolicy::MutualRequired { .. } => "mTLS",
        }
    }

    pub fn client_ca(&self) -> Option<&Path> {
        match self {
            TlsPolicy::MutualRequired { client_ca, .. } => Some(client_ca),
            _ => None,
        }
    }
}

/// Filesystem checks needed by policy resolution.
pub trait FileProbe {
    fn is_file(&self, path: &Path) -> bool;
}

/// [`FileProbe`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileProbe;

impl FileProbe for StdFileProbe {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Compute the TLS policy for `protocol`, failing closed on any missing or
/// ambiguous trust configuration.
pub fn resolve_policy(
    tls: &TlsSettings,
    protocol: ServiceProtocol,
    probe: &impl FileProbe,
) -> Result<TlsPolicy, BootstrapError> {
    if tls.disable_internal {
        tracing::info!("Internal TLS disabled, expecting TLS termination upstream");
        return Ok(TlsPolicy::Disabled);
    }

    let credential = CredentialPaths::from_settings(tls);

    let Some(client_ca) = tls.client_ca_path() else {
        tracing::warn!(
            "Running without client-certificate verification is unsafe: any peer may connect"
        );
        return match protocol {
            ServiceProtocol::Rpc => Ok(TlsPolicy::ServerOnly { credential }),
            ServiceProtocol::Http => {
                tracing::error!("The HTTP transport requires a client CA bundle (mTLS)");
                Err(BootstrapError::SecurityPolicy(
                    "the HTTP transport requires a client CA bundle when TLS is enabled".to_string(),
                ))
            }
        };
    };

    if !probe.is_file(client_ca) {
        tracing::error!(path = %client_ca.display(), "Client certificate file not found");
        return Err(BootstrapError::Configuration(format!(
            "client certificate file {} not found",
            client_ca.display()
        )));
    }

    Ok(TlsPolicy::MutualRequired {
        credential,
        client_ca: client_ca.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeProbe(HashSet<PathBuf>);

    impl FakeProbe {
        fn with(paths: &[&str]) -> Self {
            Self(paths.iter().map(PathBuf::from).collect())
        }
    }

    impl FileProbe for FakeProbe {
        fn is_file(&self, path: &Path) -> bool {
            self.0.contains(path)
        }
    }

    fn settings(ca: &str, disabled: bool) -> TlsSettings {
        TlsSettings {
            cert_file: PathBuf::from("/certs/cert.pem"),
            key_file: PathBuf::from("/certs/key.pem"),
            client_ca_file: ca.to_string(),
            disable_internal: disabled,
            ..TlsSettings::default()
        }
    }

    #[test]
    fn disabled_ignores_ca_for_both_protocols() {
        let probe = FakeProbe::with(&[]);
        for ca in ["", "/missing/ca.pem"] {
            for protocol in [ServiceProtocol::Rpc, ServiceProtocol::Http] {
                let policy = resolve_policy(&settings(ca, true), protocol, &probe).unwrap();
                assert_eq!(policy, TlsPolicy::Disabled);
            }
        }
    }

    #[test]
    fn rpc_without_ca_runs_server_only() {
        let policy =
            resolve_policy(&settings("", false), ServiceProtocol::Rpc, &FakeProbe::with(&[])).unwrap();
        assert_eq!(
            policy,
            TlsPolicy::ServerOnly {
                credential: CredentialPaths::new("/certs/cert.pem", "/certs/key.pem"),
            }
        );
        assert!(policy.client_ca().is_none());
    }

    #[test]
    fn http_without_ca_is_refused() {
        let err = resolve_policy(&settings("", false), ServiceProtocol::Http, &FakeProbe::with(&[]))
            .unwrap_err();
        assert!(matches!(err, BootstrapError::SecurityPolicy(_)));
    }

    #[test]
    fn missing_ca_file_is_fatal_for_both_protocols() {
        for protocol in [ServiceProtocol::Rpc, ServiceProtocol::Http] {
            let err = resolve_policy(
                &settings("/certs/ca.pem", false),
                protocol,
                &FakeProbe::with(&[]),
            )
            .unwrap_err();
            assert!(matches!(err, BootstrapError::Configuration(_)));
        }
    }

    #[test]
    fn existing_ca_requires_mutual_tls() {
        let probe = FakeProbe::with(&["/certs/ca.pem"]);
        for protocol in [ServiceProtocol::Rpc, ServiceProtocol::Http] {
            let policy = resolve_policy(&settings("/certs/ca.pem", false), protocol, &probe).unwrap();
            assert_eq!(policy.client_ca(), Some(Path::new("/certs/ca.pem")));
            assert_eq!(policy.describe(), "mTLS");
        }
    }
}
