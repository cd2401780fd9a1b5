//! Inbound line handlers
//!
//! A connection hands every received line to its [`LineHandler`]; a returned
//! line is written back on the same connection.

use tokio::sync::mpsc;
use tracing::debug;

/// Handles one inbound line, optionally producing a reply
pub trait LineHandler: Send + Sync {
    /// Process a received line; a `Some` return is written back to the peer
    fn handle(&self, line: &str) -> Option<String>;
}

/// Echoes every received line back to the peer
#[derive(Debug, Default)]
pub struct EchoHandler;

impl LineHandler for EchoHandler {
    fn handle(&self, line: &str) -> Option<String> {
        Some(line.to_string())
    }
}

/// Forwards every received line into an unbounded queue
///
/// The receiving half is returned by [`ForwardHandler::new`]; consumers read
/// from it at their own pace.
#[derive(Debug)]
pub struct ForwardHandler {
    queue: mpsc::UnboundedSender<String>,
}

impl ForwardHandler {
    /// Create a forward handler and the receiver for its queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { queue: tx }, rx)
    }
}

impl LineHandler for ForwardHandler {
    fn handle(&self, line: &str) -> Option<String> {
        if self.queue.send(line.to_string()).is_err() {
            debug!("Forward queue receiver dropped, discarding line");
        }
        None
    }
}
