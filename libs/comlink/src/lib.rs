//! Persistent TCP Connection Library
//!
//! Keeps an application-level peer connected across network blips and remote
//! process restarts without the caller having to detect disconnection and
//! re-dial. The controller dials until success on a fixed interval, watches
//! the connection's liveness, and re-arms dialing automatically whenever the
//! link drops unintentionally.
//!
//! # Features
//!
//! - **Retry-until-success dialing**: fixed-interval attempts with a soft
//!   time budget or an explicit retry-forever mode, cancellable mid-flight
//! - **Self-healing links**: every unintentional drop re-triggers dialing to
//!   the last endpoint until an explicit `disconnect()`
//! - **Liveness observation**: one-shot activation/deactivation callbacks
//!   attached before a connection is handed over, so no drop is missed
//! - **Pluggable transport**: the controller talks to a small trait seam;
//!   ships with a real TCP transport (newline-delimited strings) and a
//!   scripted mock for tests
//! - **Logging**: structured `tracing` instrumentation throughout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   TcpClient     │───►│    Retrier      │───►│   Transport     │
//! │  (controller)   │    │ (dial attempts) │    │  (one dial)     │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!          ▲                                             │
//!          │            ┌─────────────────┐              ▼
//!          └────────────│  Liveness drop  │◄─── attached observer
//!             redial    │  notification   │
//!                       └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use comlink::{EchoHandler, RetryPolicy, TcpClient, TcpTransport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> comlink::Result<()> {
//!     let transport = TcpTransport::with_defaults(Arc::new(EchoHandler));
//!     let client = TcpClient::new(Arc::new(transport));
//!
//!     let policy = RetryPolicy::forever(Duration::from_millis(100));
//!     let handle = client.connect_until_success("127.0.0.1", 5000, policy).await;
//!     if handle.wait().await {
//!         client.send("Hello").await?;
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod handler;
pub mod retry;
pub mod server;
pub mod transport;

pub use client::TcpClient;
pub use error::{LinkError, Result};
pub use handler::{EchoHandler, ForwardHandler, LineHandler};
pub use retry::{Retrier, RetryHandle, RetryPolicy};
pub use server::TcpServer;
pub use transport::{
    Connection, Endpoint, LinkState, LinkStats, LivenessObserver, TcpTransport,
    TcpTransportConfig, Transport,
};
