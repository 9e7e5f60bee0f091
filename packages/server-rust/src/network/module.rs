//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    gateway_handler, health_handler, liveness_handler, readiness_handler, rpc_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::gateway::Gateway;
use crate::service::{OperationService, RpcDispatcher};
use crate::traits::OutboxStore;

/// What the HTTP surfaces dispatch into.
#[derive(Clone)]
pub struct RequestHandlers {
    pub gateway: Arc<Gateway>,
    pub dispatcher: Arc<RpcDispatcher>,
    pub operations: Arc<OperationService>,
    pub outbox: Option<Arc<dyn OutboxStore>>,
}

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    handlers: RequestHandlers,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, handlers: RequestHandlers) -> Self {
        Self {
            config,
            handlers,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `POST /rpc`: MsgPack RPC
    /// - everything else: the HTTP/JSON gateway
    pub fn build_router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.handlers.gateway),
            dispatcher: Arc::clone(&self.handlers.dispatcher),
            operations: Arc::clone(&self.handlers.operations),
            outbox: self.handlers.outbox.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/rpc", post(rpc_handler))
            .fallback(gateway_handler)
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port, which differs from
    /// the configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "TCP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests for
    /// up to `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error on a fatal I/O error or unreadable TLS material.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .expect("start() must be called before serve()");
        let router = self.build_router();
        let shutdown_ctrl = Arc::clone(&self.shutdown);
        let drain_timeout = self.config.drain_timeout;

        shutdown_ctrl.set_ready();

        if let Some(tls_config) = self.config.tls.clone() {
            serve_tls(listener, router, &tls_config, shutdown).await?;
        } else {
            serve_plain(listener, router, Arc::clone(&shutdown_ctrl), shutdown).await?;
        }

        drain(&shutdown_ctrl, drain_timeout).await;
        Ok(())
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            shutdown_ctrl.trigger_shutdown();
        })
        .await?;
    Ok(())
}

/// Serves TLS through `axum-server` with rustls, reusing the bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &super::config::TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS");
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

async fn drain(shutdown_ctrl: &ShutdownController, timeout: Duration) {
    shutdown_ctrl.trigger_shutdown();
    let in_flight = shutdown_ctrl.in_flight_count();
    if in_flight > 0 {
        info!(in_flight, "draining in-flight requests");
    }
    if shutdown_ctrl.wait_for_drain(timeout).await {
        info!("all requests drained");
    } else {
        warn!(
            in_flight = shutdown_ctrl.in_flight_count(),
            "drain timeout expired with requests still in flight"
        );
    }
}
