//! TCP Transport Implementation
//!
//! Dials real TCP endpoints and drives each connection with a dedicated I/O
//! task. Messages are newline-delimited UTF-8 strings framed with
//! [`LinesCodec`]; inbound lines are fed to a [`LineHandler`] whose optional
//! reply is written back on the same connection.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::handler::LineHandler;
use crate::transport::traits::{
    Connection, Endpoint, LivenessObserver, LivenessSlot, Transport,
};

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Timeout for a single dial attempt
    pub connect_timeout: Duration,
    /// TCP no-delay (Nagle algorithm)
    pub no_delay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            no_delay: true,
        }
    }
}

impl TcpTransportConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(LinkError::ConfigError(
                "Connect timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpTransportConfig,
    handler: Arc<dyn LineHandler>,
}

impl TcpTransport {
    /// Create a new TCP transport with the given configuration and inbound
    /// line handler
    pub fn new(config: TcpTransportConfig, handler: Arc<dyn LineHandler>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, handler })
    }

    /// Create a transport with the default configuration
    pub fn with_defaults(handler: Arc<dyn LineHandler>) -> Self {
        Self {
            config: TcpTransportConfig::default(),
            handler,
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        let addr = endpoint.to_string();
        debug!("Dialing TCP endpoint: {addr}");

        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        match time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(socket)) => {
                if self.config.no_delay {
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {e}");
                    }
                }
                debug!("Connected to TCP endpoint: {addr}");
                Ok(Box::new(TcpConnection::spawn(
                    socket,
                    endpoint.clone(),
                    Arc::clone(&self.handler),
                )))
            }
            Ok(Err(e)) => Err(LinkError::DialFailed(format!(
                "Failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(LinkError::DialFailed(format!(
                "Connection to {addr} timed out"
            ))),
        }
    }
}

/// One live TCP connection with its I/O driver task
struct TcpConnection {
    endpoint: Endpoint,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    closed: watch::Receiver<bool>,
    liveness: Arc<LivenessSlot>,
}

impl TcpConnection {
    fn spawn(socket: TcpStream, endpoint: Endpoint, handler: Arc<dyn LineHandler>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let liveness = Arc::new(LivenessSlot::new());

        tokio::spawn(drive_connection(
            socket,
            endpoint.clone(),
            handler,
            outbound_rx,
            cancel.clone(),
            Arc::clone(&liveness),
            closed_tx,
        ));

        Self {
            endpoint,
            outbound: outbound_tx,
            cancel,
            closed: closed_rx,
            liveness,
        }
    }
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
    fn send(&self, line: &str) -> Result<()> {
        self.outbound
            .send(line.to_string())
            .map_err(|_| LinkError::SendFailed("Connection closed".to_string()))
    }

    async fn close(&self) {
        self.cancel.cancel();
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|done| *done).await;
    }

    fn remote_endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn subscribe_liveness(&self, observer: LivenessObserver) {
        self.liveness.attach(observer);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        // A discarded connection takes its I/O task down with it
        self.cancel.cancel();
    }
}

async fn drive_connection(
    socket: TcpStream,
    endpoint: Endpoint,
    handler: Arc<dyn LineHandler>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    liveness: Arc<LivenessSlot>,
    closed_tx: watch::Sender<bool>,
) {
    let framed = Framed::new(socket, LinesCodec::new());
    let (mut sink, mut lines) = framed.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connection to {endpoint} closing");
                break;
            }
            outgoing = outbound_rx.recv() => match outgoing {
                Some(line) => {
                    if let Err(e) = sink.send(line).await {
                        warn!("Write to {endpoint} failed: {e}");
                        break;
                    }
                }
                None => break,
            },
            incoming = lines.next() => match incoming {
                Some(Ok(line)) => {
                    if let Some(reply) = handler.handle(&line) {
                        if let Err(e) = sink.send(reply).await {
                            warn!("Write to {endpoint} failed: {e}");
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Read error on connection to {endpoint}: {e}");
                    break;
                }
                None => {
                    debug!("Connection to {endpoint} closed by peer");
                    break;
                }
            },
        }
    }

    liveness.fire_deactivated();
    let _ = closed_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;

    #[test]
    fn test_config_validation() {
        assert!(TcpTransportConfig::default().validate().is_ok());

        let config = TcpTransportConfig {
            connect_timeout: Duration::ZERO,
            no_delay: true,
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_dial_refused_reports_failure() {
        let transport = TcpTransport::with_defaults(Arc::new(EchoHandler));
        let endpoint = Endpoint::new("127.0.0.1", 1);

        let result = transport.dial(&endpoint).await;
        assert!(matches!(result, Err(LinkError::DialFailed(_))));
    }
}
