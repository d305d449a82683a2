//! Web layer: router, shared state and server lifecycle.
//!
//! The server owns the process-wide pieces (the outbound HTTP client
//! pool, the upstream client and the session registry) and hands them to
//! handlers through [`AppState`]. On shutdown (SIGINT/SIGTERM) it stops
//! accepting requests, cancels every producer and waits for teardown to
//! complete before the outbound client drops.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::get;
use tracing::{error, info};

use crate::config::Config;
use crate::errors::AppError;
use crate::streaming::SessionRegistry;
use crate::upstream::HttpUpstreamClient;

pub mod handlers;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub config: Arc<Config>,
}

/// Web server configuration and setup.
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
    registry: SessionRegistry,
}

impl WebServer {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .build()
            .map_err(crate::errors::UpstreamError::Http)?;

        let upstream = Arc::new(HttpUpstreamClient::new(http, &config)?);
        let registry = SessionRegistry::new(upstream, config.read_timeout());
        let addr = config.listen_addr;

        let state = AppState {
            registry: registry.clone(),
            config: Arc::new(config),
        };
        let app = Self::create_router(&state);

        Ok(Self {
            app,
            addr,
            registry,
        })
    }

    fn create_router(state: &AppState) -> Router {
        let mut router = Router::new()
            .route("/ace/getstream", get(handlers::getstream))
            .route("/ace/getstream/", get(handlers::getstream))
            .route("/ace/status", get(handlers::status));
        if state.config.m3u8 {
            router = router.route("/ace/manifest.m3u8", get(handlers::getstream));
        }
        router.with_state(state.clone())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until an interrupt signal arrives, then drain active
    /// sessions before returning.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("listening on {}", listener.local_addr()?);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.registry.shutdown().await;
        Ok(())
    }

    /// Serve, reporting the bound address (or the bind failure) through
    /// `ready_signal` once the listener is actually accepting.
    pub async fn serve_with_signal(
        self,
        ready_signal: tokio::sync::oneshot::Sender<Result<SocketAddr>>,
    ) -> Result<()> {
        match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => {
                let local_addr = listener.local_addr()?;
                let _ = ready_signal.send(Ok(local_addr));

                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await?;

                self.registry.shutdown().await;
                Ok(())
            }
            Err(bind_error) => {
                let message = format!("failed to bind to {}: {}", self.addr, bind_error);
                let _ = ready_signal.send(Err(anyhow::anyhow!("{}", message)));
                Err(anyhow::anyhow!("{}", message))
            }
        }
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
