//! Mock transport for testing
//!
//! Scripted counterpart of the TCP transport: dials can be made to fail a
//! fixed number of times before succeeding, established connections record
//! sent lines, and drops are triggered manually.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{LinkError, Result};
use crate::transport::traits::{
    Connection, Endpoint, LivenessObserver, LivenessSlot, Transport,
};

/// Mock transport with scripted dial outcomes
#[derive(Default)]
pub struct MockTransport {
    fail_remaining: AtomicU32,
    dial_count: AtomicU32,
    connections: Mutex<Vec<Arc<MockConnectionHandle>>>,
}

impl MockTransport {
    /// Create a transport whose dials always succeed
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose first `n` dials fail
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_remaining: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// Total dial attempts observed
    pub fn dial_count(&self) -> u32 {
        self.dial_count.load(Ordering::SeqCst)
    }

    /// Handle on the most recently established connection
    pub fn last_connection(&self) -> Option<Arc<MockConnectionHandle>> {
        self.connections.lock().last().cloned()
    }

    /// Handles on all established connections, in dial order
    pub fn connections(&self) -> Vec<Arc<MockConnectionHandle>> {
        self.connections.lock().clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        self.dial_count.fetch_add(1, Ordering::SeqCst);

        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(LinkError::DialFailed("Scripted dial failure".to_string()));
        }

        let handle = Arc::new(MockConnectionHandle {
            endpoint: endpoint.clone(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            liveness: LivenessSlot::new(),
        });
        self.connections.lock().push(Arc::clone(&handle));
        Ok(Box::new(MockConnection { handle }))
    }
}

/// Test-side view of one mock connection
pub struct MockConnectionHandle {
    endpoint: Endpoint,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    liveness: LivenessSlot,
}

impl MockConnectionHandle {
    /// Simulate an unintentional drop (peer reset, network failure)
    pub fn trigger_drop(&self) {
        self.liveness.fire_deactivated();
    }

    /// Lines submitted through this connection
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Whether the connection was explicitly closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The endpoint this connection was dialed against
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }
}

struct MockConnection {
    handle: Arc<MockConnectionHandle>,
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    fn send(&self, line: &str) -> Result<()> {
        if self.handle.closed.load(Ordering::SeqCst) {
            return Err(LinkError::SendFailed("Connection closed".to_string()));
        }
        self.handle.sent.lock().push(line.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.handle.closed.store(true, Ordering::SeqCst);
        self.handle.liveness.fire_deactivated();
    }

    fn remote_endpoint(&self) -> Endpoint {
        self.handle.endpoint.clone()
    }

    fn subscribe_liveness(&self, observer: LivenessObserver) {
        self.handle.liveness.attach(observer);
    }
}
