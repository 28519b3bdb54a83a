//! Relay server
//!
//! Binds the HTTP / WebSocket listener and the producer TCP listener around
//! one shared hub and runs both until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::api::{build_router, AppState};
use crate::config::Config;
use crate::ingest::{IngestPipeline, ProducerListener};
use crate::protocol::{RelayError, RelayResult};
use crate::websocket::{BroadcastHub, ResetHandler};

/// Both listeners of a running relay
#[derive(Debug)]
pub struct RelayServer {
    http: TcpListener,
    producers: ProducerListener,
    state: AppState,
}

impl RelayServer {
    /// Bind both listeners
    pub async fn bind(config: &Config, reset: Arc<dyn ResetHandler>) -> RelayResult<Self> {
        let state = AppState::new(config.server.clone(), config.hub.clone(), reset);

        let http = TcpListener::bind(config.server.addr()).await?;

        let pipeline = IngestPipeline::new(Arc::clone(&state.hub), Arc::clone(&state.handshake));
        let producers = ProducerListener::bind(config.ingest.clone(), pipeline).await?;

        Ok(Self {
            http,
            producers,
            state,
        })
    }

    /// Address subscribers connect to
    pub fn http_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    /// Address producers connect to
    pub fn producer_addr(&self) -> RelayResult<SocketAddr> {
        self.producers.local_addr()
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.state.hub)
    }

    /// Serve until `shutdown` resolves
    ///
    /// The hub is shut down first, which closes every subscriber socket;
    /// only then are the listeners stopped.
    pub async fn run<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let http_addr = self.http_addr()?;
        let RelayServer {
            http,
            producers,
            state,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        let hub = Arc::clone(&state.hub);

        tracing::info!("Relay HTTP listening on {}", http_addr);
        tracing::info!("Subscribers connect to ws://{}/ws", http_addr);

        let trigger = async move {
            shutdown.await;
            tracing::info!("Shutting down relay");
            hub.shutdown().await;
            let _ = stop_tx.send(true);
            Ok::<(), RelayError>(())
        };

        let router = build_router(state);
        let http_stop = stopped(stop_rx.clone());
        let http = async move {
            axum::serve(http, router)
                .with_graceful_shutdown(http_stop)
                .await
                .map_err(RelayError::Io)
        };

        let producers = producers.run(stopped(stop_rx));

        tokio::try_join!(trigger, http, producers)?;

        tracing::info!("Relay shut down gracefully");
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
