//! TCP line server
//!
//! Counterpart used by the integration tests and demos: accepts connections,
//! runs each through the shared [`LineHandler`] pipeline, and supports a
//! shutdown that also closes accepted connections so tests can simulate a
//! remote process restart.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::handler::LineHandler;

struct ServerRuntime {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// TCP server running a line pipeline on every accepted connection
pub struct TcpServer {
    handler: Arc<dyn LineHandler>,
    runtime: Mutex<Option<ServerRuntime>>,
    accepted: Arc<AtomicU64>,
}

impl TcpServer {
    /// Create a server with the given per-connection handler
    pub fn new(handler: Arc<dyn LineHandler>) -> Self {
        Self {
            handler,
            runtime: Mutex::new(None),
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind and start accepting connections
    pub async fn start(&self, bind_ip: &str, port: u16) -> Result<SocketAddr> {
        if self.runtime.lock().is_some() {
            return Err(LinkError::ConfigError(
                "Server is already running".to_string(),
            ));
        }

        let listener = TcpListener::bind((bind_ip, port))
            .await
            .map_err(|e| LinkError::IoError(format!("Failed to bind {bind_ip}:{port}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| LinkError::IoError(format!("Failed to read local address: {e}")))?;

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            cancel.clone(),
            Arc::clone(&self.accepted),
        ));

        info!("Server listening on {local_addr}");
        *self.runtime.lock() = Some(ServerRuntime {
            cancel,
            local_addr,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting and close all accepted connections
    pub async fn shutdown(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            let _ = runtime.accept_task.await;
            info!("Server on {} shut down", runtime.local_addr);
        }
    }

    /// Whether the server is currently accepting connections
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Address the server is bound to, if running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.lock().as_ref().map(|r| r.local_addr)
    }

    /// Total connections accepted since creation
    pub fn accepted_connections(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn LineHandler>,
    cancel: CancellationToken,
    accepted: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            incoming = listener.accept() => match incoming {
                Ok((socket, peer)) => {
                    debug!("Accepted connection from {peer}");
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        socket,
                        peer,
                        Arc::clone(&handler),
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    warn!("Accept failed: {e}");
                }
            },
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn LineHandler>,
    cancel: CancellationToken,
) {
    let framed = Framed::new(socket, LinesCodec::new());
    let (mut sink, mut lines) = framed.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Closing connection from {peer}");
                break;
            }
            incoming = lines.next() => match incoming {
                Some(Ok(line)) => {
                    if let Some(reply) = handler.handle(&line) {
                        if let Err(e) = sink.send(reply).await {
                            warn!("Write to {peer} failed: {e}");
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Read error on connection from {peer}: {e}");
                    break;
                }
                None => {
                    debug!("Connection from {peer} closed by peer");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let server = TcpServer::new(Arc::new(EchoHandler));
        server.start("127.0.0.1", 0).await.unwrap();

        assert!(server.is_running());
        assert!(server.start("127.0.0.1", 0).await.is_err());

        server.shutdown().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let server = TcpServer::new(Arc::new(EchoHandler));
        let addr = server.start("127.0.0.1", 0).await.unwrap();
        server.shutdown().await;

        let rebound = server.start("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(rebound.port(), addr.port());
        server.shutdown().await;
    }
}
