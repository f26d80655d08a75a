//! Shared harness for the transport tests.
//!
//! A throwaway CA signs both the server and client certificates. Nodes are
//! prepared from an [`AppConfig`] the same way the binary does it, then run
//! through [`start_transport_with`] with a oneshot standing in for SIGTERM.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use nodegate::certificate::SelfSignedGenerator;
use nodegate::config::AppConfig;
use nodegate::policy::StdFileProbe;
use nodegate::service::NodeService;
use nodegate::transport::start_transport_with;
use nodegate::{BootstrapError, Startup};

pub struct Pki {
    pub ca: Certificate,
    ca_key: KeyPair,
}

impl Pki {
    pub fn new() -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "test control plane CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca = params.self_signed(&ca_key).unwrap();
        Self { ca, ca_key }
    }

    /// Issue a leaf certificate for `name`, returning (cert PEM, key PEM).
    pub fn issue(&self, name: &str) -> (String, String) {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca, &self.ca_key).unwrap();
        (cert.pem(), key.serialize_pem())
    }
}

pub fn client_config(pki: &Pki, client_identity: Option<(String, String)>, alpn: &[&[u8]]) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add(pki.ca.der().clone()).unwrap();

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots);

    let mut config = match client_identity {
        Some((cert_pem, key_pem)) => {
            let certs: Vec<CertificateDer<'static>> =
                rustls_pemfile::certs(&mut cert_pem.as_bytes())
                    .collect::<Result<_, _>>()
                    .unwrap();
            let key: PrivateKeyDer<'static> =
                rustls_pemfile::private_key(&mut key_pem.as_bytes()).unwrap().unwrap();
            builder.with_client_auth_cert(certs, key).unwrap()
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    config
}

/// How the node under test is asked to secure its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Disabled,
    ServerOnly,
    Mutual,
}

/// A node serving on loopback until [`RunningNode::stop`] is called.
pub struct RunningNode {
    pub addr: SocketAddr,
    pub startup_tls: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), BootstrapError>>,
}

impl RunningNode {
    /// Fire the shutdown future and wait for the transport to return.
    pub async fn stop(self) -> Result<(), BootstrapError> {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("transport did not stop after shutdown")
            .expect("transport task panicked")
    }
}

/// Grab a port the OS considers free right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_until_listening(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("node never started listening on {addr}");
}

/// Write a CA-signed server credential into `dir`, prepare the node and
/// start the planned transport.
pub async fn start_node(dir: &Path, pki: &Pki, protocol: &str, security: Security) -> RunningNode {
    let (server_cert, server_key) = pki.issue("localhost");
    let mut config = AppConfig::default();
    config.service.host = "127.0.0.1".to_string();
    config.service.port = free_port();
    config.service.protocol = protocol.to_string();
    config.tls.cert_file = dir.join("server_cert.pem");
    config.tls.key_file = dir.join("server_key.pem");
    config.tls.disable_internal = security == Security::Disabled;
    std::fs::write(&config.tls.cert_file, server_cert).unwrap();
    std::fs::write(&config.tls.key_file, server_key).unwrap();
    if security == Security::Mutual {
        let ca_path = dir.join("client_ca.pem");
        std::fs::write(&ca_path, pki.ca.pem()).unwrap();
        config.tls.client_ca_file = ca_path.display().to_string();
    }

    let Startup {
        protocol,
        policy,
        plan,
        addr,
        generated_credential,
    } = nodegate::prepare(
        &config,
        SelfSignedGenerator::from_settings(&config.tls),
        &StdFileProbe,
    )
    .unwrap();
    assert!(!generated_credential);

    let (stop, stop_rx) = oneshot::channel::<()>();
    let service = Arc::new(NodeService::new(protocol.to_string(), policy.describe()));
    let task = tokio::spawn(start_transport_with(plan, service, addr, async move {
        let _ = stop_rx.await;
    }));
    wait_until_listening(addr).await;

    RunningNode {
        addr,
        startup_tls: policy.describe().to_string(),
        stop,
        task,
    }
}
