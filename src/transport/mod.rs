//! Control transport selection.
//!
//! Exactly one transport runs per process:
//! - **RPC**: JSON frames over TLS. The server certificate is always
//!   presented; a client CA is enforced only under mutual TLS.
//! - **HTTP**: axum routes, either behind mutual TLS or as plain HTTP when
//!   internal TLS is disabled.
//!
//! [`select_transport`] decides what to start; [`start_transport`] builds
//! the TLS configuration and blocks serving it until a shutdown signal.

pub mod http;
pub mod rpc;
pub mod shutdown;
pub mod tls;

use std::fmt;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::certificate::CredentialPaths;
use crate::config::ServiceConfig;
use crate::error::BootstrapError;
use crate::policy::TlsPolicy;
use crate::service::ControlService;

/// Which control transport to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProtocol {
    Rpc,
    Http,
}

impl FromStr for ServiceProtocol {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpc" | "rpyc" => Ok(ServiceProtocol::Rpc),
            "http" | "rest" => Ok(ServiceProtocol::Http),
            _ => {
                tracing::error!(protocol = %s, "Service protocol must be \"rpc\" or \"http\"");
                Err(BootstrapError::Configuration(format!(
                    "service protocol must be \"rpc\" or \"http\", got {:?}",
                    s
                )))
            }
        }
    }
}

impl fmt::Display for ServiceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceProtocol::Rpc => f.write_str("rpc"),
            ServiceProtocol::Http => f.write_str("http"),
        }
    }
}

/// TLS parameters for the RPC listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTls {
    pub credential: CredentialPaths,
    /// `None` accepts any client, with or without a certificate
    pub client_ca: Option<PathBuf>,
}

/// TLS parameters for the HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTls {
    pub credential: CredentialPaths,
    pub client_ca: PathBuf,
    pub require_client_cert: bool,
}

/// Fully resolved transport to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPlan {
    Rpc { tls: RpcTls },
    Http { tls: Option<HttpTls> },
}

impl TransportPlan {
    pub fn protocol(&self) -> ServiceProtocol {
        match self {
            TransportPlan::Rpc { .. } => ServiceProtocol::Rpc,
            TransportPlan::Http { .. } => ServiceProtocol::Http,
        }
    }
}

/// Decide the transport configuration for `protocol` under `policy`.
///
/// `credential` is the server pair on disk; the RPC transport presents it
/// whatever the policy.
pub fn select_transport(
    protocol: ServiceProtocol,
    policy: &TlsPolicy,
    credential: &CredentialPaths,
) -> Result<TransportPlan, BootstrapError> {
    match protocol {
        ServiceProtocol::Rpc => Ok(TransportPlan::Rpc {
            tls: RpcTls {
                credential: credential.clone(),
                client_ca: policy.client_ca().map(|ca| ca.to_path_buf()),
            },
        }),
        ServiceProtocol::Http => match policy {
            TlsPolicy::Disabled => Ok(TransportPlan::Http { tls: None }),
            TlsPolicy::MutualRequired {
                credential,
                client_ca,
            } => Ok(TransportPlan::Http {
                tls: Some(HttpTls {
                    credential: credential.clone(),
                    client_ca: client_ca.clone(),
                    require_client_cert: true,
                }),
            }),
            TlsPolicy::ServerOnly { .. } => Err(BootstrapError::SecurityPolicy(
                "the HTTP transport cannot run server-only TLS".to_string(),
            )),
        },
    }
}

/// Resolve the configured bind address.
pub fn bind_addr(service: &ServiceConfig) -> Result<SocketAddr, BootstrapError> {
    (service.host.as_str(), service.port)
        .to_socket_addrs()
        .map_err(|e| {
            BootstrapError::Configuration(format!(
                "invalid service address {}:{}: {}",
                service.host, service.port, e
            ))
        })?
        .next()
        .ok_or_else(|| {
            BootstrapError::Configuration(format!(
                "service host {} did not resolve to an address",
                service.host
            ))
        })
}

/// Start the planned transport and block until SIGINT or SIGTERM.
pub async fn start_transport(
    plan: TransportPlan,
    service: Arc<dyn ControlService>,
    addr: SocketAddr,
) -> Result<(), BootstrapError> {
    start_transport_with(plan, service, addr, shutdown::shutdown_signal()).await
}

/// Start the planned transport and block until `shutdown` resolves.
pub async fn start_transport_with<F>(
    plan: TransportPlan,
    service: Arc<dyn ControlService>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), BootstrapError>
where
    F: Future<Output = ()> + Send + 'static,
{
    match plan {
        TransportPlan::Rpc { tls } => {
            let config = tls::server_config(
                &tls.credential.cert,
                &tls.credential.key,
                tls.client_ca.as_deref(),
                &[],
            )?;
            let server = rpc::RpcServer::bind(addr, Arc::new(config)).await?;
            tracing::info!(
                %addr,
                client_ca = tls.client_ca.is_some(),
                "Node (rpc) listening"
            );
            server.serve(service, shutdown).await
        }
        TransportPlan::Http { tls } => {
            let config = match tls {
                Some(tls) => Some(Arc::new(tls::server_config(
                    &tls.credential.cert,
                    &tls.credential.key,
                    Some(tls.client_ca.as_path()),
                    tls::HTTP_ALPN,
                )?)),
                None => None,
            };
            tracing::info!(%addr, "Node (http) listening");
            http::serve(http::create_router(service), addr, config, shutdown).await
        }
    }
}
