//! RPC transport: newline-delimited JSON frames over TLS.
//!
//! Each connection is handled on its own task. A frame is one JSON object
//! per line:
//!
//! ```text
//! -> {"id": 1, "method": "ping"}
//! <- {"id": 1, "result": {"pong": true}}
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::error::BootstrapError;
use crate::service::ControlService;

/// Largest accepted request frame, in bytes
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Time a peer has to complete the TLS handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorBody {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Malformed request: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Request is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown method: {0}")]
    MethodNotFound(String),

    #[error("Request frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Parse(_) | RpcError::InvalidUtf8 => -32700,
            RpcError::FrameTooLarge => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::Internal(_) => -32603,
        }
    }
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: &RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }
}

/// Decode one frame and run it against `service`.
pub async fn dispatch(service: &dyn ControlService, frame: &str) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(frame) {
        Ok(request) => request,
        Err(e) => return RpcResponse::err(Value::Null, &RpcError::Parse(e)),
    };

    let result = match request.method.as_str() {
        "ping" => serde_json::to_value(service.ping().await),
        "info" => serde_json::to_value(service.info().await),
        other => {
            tracing::debug!(method = %other, "Unknown RPC method");
            return RpcResponse::err(request.id, &RpcError::MethodNotFound(other.to_string()));
        }
    };

    match result {
        Ok(value) => RpcResponse::ok(request.id, value),
        Err(e) => RpcResponse::err(request.id, &RpcError::Internal(e.to_string())),
    }
}

/// Read frames from `stream` until EOF, answering each one.
pub async fn serve_stream<S>(stream: S, service: &dyn ControlService) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(());
        }

        // Length is checked on raw bytes; the cut may split a UTF-8 sequence
        if read > MAX_FRAME_BYTES && buf.last() != Some(&b'\n') {
            let response = RpcResponse::err(Value::Null, &RpcError::FrameTooLarge);
            write_frame(&mut writer, &response).await?;
            return Ok(());
        }

        let frame = match std::str::from_utf8(&buf) {
            Ok(frame) => frame.trim(),
            Err(_) => {
                let response = RpcResponse::err(Value::Null, &RpcError::InvalidUtf8);
                write_frame(&mut writer, &response).await?;
                continue;
            }
        };
        if frame.is_empty() {
            continue;
        }

        let response = dispatch(service, frame).await;
        write_frame(&mut writer, &response).await?;
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, response: &RpcResponse) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Bound RPC listener, ready to serve.
pub struct RpcServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl RpcServer {
    pub async fn bind(addr: SocketAddr, tls: Arc<ServerConfig>) -> Result<Self, BootstrapError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BootstrapError::Bind { addr, source })?;
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self, service: Arc<dyn ControlService>, shutdown: F) -> Result<(), BootstrapError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("RPC server stopped accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let acceptor = self.acceptor.clone();
                        let service = Arc::clone(&service);
                        let timeout = self.handshake_timeout;
                        tokio::spawn(handle_connection(acceptor, stream, peer, service, timeout));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept RPC connection");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<dyn ControlService>,
    handshake_timeout: Duration,
) {
    let tls_stream = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls_stream)) => tls_stream,
        Ok(Err(e)) => {
            tracing::warn!(%peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(%peer, timeout_ms = handshake_timeout.as_millis() as u64, "TLS handshake timed out");
            return;
        }
    };

    let client_certs = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.len())
        .unwrap_or(0);
    tracing::debug!(%peer, client_certs, "RPC connection established");

    match serve_stream(tls_stream, service.as_ref()).await {
        Ok(()) => tracing::debug!(%peer, "RPC connection closed"),
        Err(e) => tracing::debug!(%peer, error = %e, "RPC connection ended with error"),
    }
}
