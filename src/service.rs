//! Control surface served by both transports.
//!
//! The proxy-core management API lives behind [`ControlService`]; this crate
//! ships only the liveness and identity calls the control plane uses to
//! check that it reached the right node.

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pong {
    pub pong: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub version: String,
    pub instance_id: Uuid,
    pub transport: String,
    pub tls: String,
    pub uptime_seconds: u64,
}

#[async_trait]
pub trait ControlService: Send + Sync + 'static {
    async fn ping(&self) -> Pong;
    async fn info(&self) -> NodeInfo;
}

/// Default [`ControlService`] reporting this process's identity.
#[derive(Debug)]
pub struct NodeService {
    instance_id: Uuid,
    transport: String,
    tls: String,
    started: Instant,
}

impl NodeService {
    pub fn new(transport: impl Into<String>, tls: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            transport: transport.into(),
            tls: tls.into(),
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl ControlService for NodeService {
    async fn ping(&self) -> Pong {
        Pong { pong: true }
    }

    async fn info(&self) -> NodeInfo {
        NodeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: self.instance_id,
            transport: self.transport.clone(),
            tls: self.tls.clone(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}
