//! Producer TCP listener
//!
//! Accepts raw stream connections from producers. Each connection gets its
//! own task and its own [`FrameExtractor`]; frames are dispatched in the
//! order they complete, which preserves per-producer ordering.

use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use super::frame::{FrameExtractor, DEFAULT_MAX_FRAME_BYTES};
use super::pipeline::IngestPipeline;
use crate::protocol::RelayResult;

/// Producer listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port producers connect to
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Bytes buffered per connection before an incomplete frame is discarded
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Size of each socket read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_tcp_port() -> u16 {
    8080
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_read_buffer_size() -> usize {
    8 * 1024 // 8 KB
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tcp_port: default_tcp_port(),
            max_frame_bytes: default_max_frame_bytes(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl IngestConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }
}

/// Accept loop for producer connections
#[derive(Debug)]
pub struct ProducerListener {
    listener: TcpListener,
    pipeline: IngestPipeline,
    config: IngestConfig,
}

impl ProducerListener {
    /// Bind the producer port
    pub async fn bind(config: IngestConfig, pipeline: IngestPipeline) -> RelayResult<Self> {
        let listener = TcpListener::bind(config.addr()).await?;
        Ok(Self {
            listener,
            pipeline,
            config,
        })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept producers until `shutdown` resolves
    ///
    /// On shutdown every producer task is aborted and awaited before this
    /// returns, so no connection outlives the listener.
    pub async fn run<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Producer listener on {}", self.local_addr()?);

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let pipeline = self.pipeline.clone();
                        let config = self.config.clone();
                        connections.spawn(handle_producer(stream, peer, pipeline, config));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept producer connection");
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Producer task panicked");
                        }
                    }
                }
            }
        }

        let open = connections.len();
        connections.shutdown().await;
        tracing::info!(closed = open, "Producer listener stopped");
        Ok(())
    }
}

/// Read one producer stream to completion
async fn handle_producer(
    mut stream: TcpStream,
    peer: SocketAddr,
    pipeline: IngestPipeline,
    config: IngestConfig,
) {
    tracing::info!(peer = %peer, "Producer connected");

    let mut extractor = FrameExtractor::with_max_buffered(config.max_frame_bytes);
    let mut chunk = vec![0u8; config.read_buffer_size.max(1)];
    let mut frames = 0usize;

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for frame in extractor.push(&chunk[..n]) {
                    pipeline.dispatch(&frame).await;
                    frames += 1;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Producer connection error");
                break;
            }
        }
    }

    if !extractor.is_empty() {
        tracing::debug!(
            peer = %peer,
            pending = extractor.buffered().len(),
            "Discarding incomplete data from closed producer"
        );
    }

    tracing::info!(peer = %peer, frames, "Producer disconnected");
}
