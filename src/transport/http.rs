//! HTTP transport.
//!
//! Serves the control routes with axum. With a TLS config the listener
//! requires client certificates (see [`super::tls::server_config`]);
//! without one it runs plain HTTP behind an upstream TLS terminator.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use http::header::{HeaderValue, CACHE_CONTROL};
use rustls::ServerConfig;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::BootstrapError;
use crate::middleware::request_id_layer;
use crate::service::{ControlService, NodeInfo, Pong};

use super::shutdown;

type SharedService = Arc<dyn ControlService>;

async fn info(State(service): State<SharedService>) -> Json<NodeInfo> {
    Json(service.info().await)
}

async fn ping(State(service): State<SharedService>) -> Json<Pong> {
    Json(service.ping().await)
}

/// Liveness check; only confirms that the process answers HTTP.
async fn health() -> &'static str {
    "ok"
}

/// Build the control router.
pub fn create_router(service: SharedService) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/ping", get(ping).post(ping))
        .route("/health", get(health))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(middleware::from_fn(request_id_layer))
        .with_state(service)
}

fn serve_error(addr: SocketAddr, e: std::io::Error) -> BootstrapError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
            BootstrapError::Bind { addr, source: e }
        }
        _ => BootstrapError::Server(e.to_string()),
    }
}

/// Serve `app` on `addr` until `signal` resolves.
pub async fn serve<F>(
    app: Router,
    addr: SocketAddr,
    tls: Option<Arc<ServerConfig>>,
    signal: F,
) -> Result<(), BootstrapError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::new();
    shutdown::setup_shutdown_handler(handle.clone(), signal);

    match tls {
        None => {
            tracing::warn!(%addr, "HTTP transport running without TLS");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| serve_error(addr, e))
        }
        Some(config) => {
            tracing::info!(%addr, "HTTP transport requiring client certificates");
            axum_server::bind_rustls(addr, RustlsConfig::from_config(config))
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| serve_error(addr, e))
        }
    }
}
