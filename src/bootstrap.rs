//! Startup sequence.
//!
//! Credentials are provisioned first and unconditionally, then the protocol
//! and TLS policy are resolved, and finally exactly one transport is started.
//! Every step returns a [`BootstrapError`] instead of exiting; `main` owns the
//! process exit status.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::certificate::{CertificateStore, CredentialGenerator, CredentialPaths, SelfSignedGenerator};
use crate::config::AppConfig;
use crate::error::BootstrapError;
use crate::policy::{resolve_policy, FileProbe, StdFileProbe, TlsPolicy};
use crate::service::NodeService;
use crate::transport::{bind_addr, select_transport, start_transport, ServiceProtocol, TransportPlan};

/// Everything decided before a listener is bound.
#[derive(Debug, Clone)]
pub struct Startup {
    pub protocol: ServiceProtocol,
    pub policy: TlsPolicy,
    pub plan: TransportPlan,
    pub addr: SocketAddr,
    /// Whether this run generated the server credential
    pub generated_credential: bool,
}

/// Provision credentials and resolve the transport without binding anything.
pub fn prepare<G, P>(config: &AppConfig, generator: G, probe: &P) -> Result<Startup, BootstrapError>
where
    G: CredentialGenerator,
    P: FileProbe,
{
    let store = CertificateStore::new(CredentialPaths::from_settings(&config.tls), generator);
    let credential = store.ensure_server_credential()?;
    if credential.generated {
        tracing::info!(
            cert = %credential.paths.cert.display(),
            key = %credential.paths.key.display(),
            "Generated server credential"
        );
    }

    let protocol: ServiceProtocol = config.service.protocol.parse()?;
    let policy = resolve_policy(&config.tls, protocol, probe)?;
    let plan = select_transport(protocol, &policy, &credential.paths)?;
    let addr = bind_addr(&config.service)?;

    Ok(Startup {
        protocol,
        policy,
        plan,
        addr,
        generated_credential: credential.generated,
    })
}

/// Run the node until its transport shuts down.
pub async fn run(config: &AppConfig) -> Result<(), BootstrapError> {
    let startup = prepare(config, SelfSignedGenerator::from_settings(&config.tls), &StdFileProbe)?;

    tracing::info!(
        protocol = %startup.protocol,
        port = startup.addr.port(),
        tls = startup.policy.describe(),
        "Starting node"
    );

    let service = Arc::new(NodeService::new(
        startup.protocol.to_string(),
        startup.policy.describe(),
    ));
    start_transport(startup.plan, service, startup.addr).await
}
