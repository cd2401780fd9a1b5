//! Transport Layer Traits
//!
//! This module defines the seam between the persistent connection controller
//! and the underlying byte transport: dialing, sending, closing, and liveness
//! notification. The controller only ever talks to these traits, so the real
//! TCP transport and the scripted mock are interchangeable.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::error::Result;

/// A dial target: host and port
///
/// The only addressing mode in scope. The host may be an IP literal or a
/// resolvable hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Remote host address
    pub host: String,
    /// Remote port number
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No connection and no dialing in progress
    Disconnected,
    /// A dial attempt or retry task is in flight
    Connecting,
    /// A connection is established and usable
    Connected,
}

/// Link statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStats {
    /// Total dial attempts
    pub dial_attempts: u64,
    /// Number of successful connections
    pub successful_connects: u64,
    /// Number of failed dial attempts
    pub failed_dials: u64,
    /// Number of connection drops (any cause)
    pub drops: u64,
    /// Number of drop-triggered redial rounds
    pub redials: u64,
    /// Last successful connection time
    pub last_connected: Option<SystemTime>,
}

impl LinkStats {
    /// Record a successful dial attempt
    pub fn record_connected(&mut self) {
        self.dial_attempts += 1;
        self.successful_connects += 1;
        self.last_connected = Some(SystemTime::now());
    }

    /// Record a failed dial attempt
    pub fn record_failed_dial(&mut self) {
        self.dial_attempts += 1;
        self.failed_dials += 1;
    }

    /// Record a connection drop
    pub fn record_drop(&mut self) {
        self.drops += 1;
    }

    /// Record the start of a drop-triggered redial round
    pub fn record_redial(&mut self) {
        self.redials += 1;
    }
}

/// One-shot liveness callbacks attached to a single connection.
///
/// `on_activated` fires once when the connection is usable, `on_deactivated`
/// fires once when it becomes unusable, regardless of cause (explicit close,
/// peer reset, transport error). `FnOnce` makes at-most-once delivery a type
/// system guarantee. Neither callback fires for a connection that was never
/// established: dial failures are reported through the dial result instead.
pub struct LivenessObserver {
    pub(crate) on_activated: Box<dyn FnOnce() + Send>,
    pub(crate) on_deactivated: Box<dyn FnOnce() + Send>,
}

impl LivenessObserver {
    /// Create an observer from an activation and a deactivation callback
    pub fn new(
        on_activated: impl FnOnce() + Send + 'static,
        on_deactivated: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            on_activated: Box::new(on_activated),
            on_deactivated: Box::new(on_deactivated),
        }
    }
}

impl fmt::Debug for LivenessObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessObserver").finish_non_exhaustive()
    }
}

/// Delivery state shared between a connection and its I/O driver.
///
/// Guarantees the attachment ordering contract: if the connection died
/// before an observer was attached, the deactivation is delivered at
/// attachment time instead of being lost.
#[derive(Default)]
pub(crate) struct LivenessSlot {
    inner: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    on_deactivated: Option<Box<dyn FnOnce() + Send>>,
    deactivated: bool,
}

impl LivenessSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach an observer. Fires `on_activated` immediately (the connection
    /// was usable when it was handed out) and `on_deactivated` right after
    /// if the connection already went down.
    pub(crate) fn attach(&self, observer: LivenessObserver) {
        (observer.on_activated)();
        let fire_now = {
            let mut state = self.inner.lock();
            if state.deactivated {
                Some(observer.on_deactivated)
            } else {
                state.on_deactivated = Some(observer.on_deactivated);
                None
            }
        };
        if let Some(on_deactivated) = fire_now {
            on_deactivated();
        }
    }

    /// Mark the connection down and deliver the deactivation callback if one
    /// is attached. Idempotent: later calls are no-ops.
    pub(crate) fn fire_deactivated(&self) {
        let callback = {
            let mut state = self.inner.lock();
            if state.deactivated {
                return;
            }
            state.deactivated = true;
            state.on_deactivated.take()
        };
        if let Some(on_deactivated) = callback {
            on_deactivated();
        }
    }
}

/// A transport that can dial an endpoint and produce a connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform exactly one dial attempt against the endpoint
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>>;
}

/// A live bidirectional message connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Submit one message for delivery. Only submission is guaranteed when
    /// this returns; the actual write is completed by the connection's I/O
    /// driver.
    fn send(&self, line: &str) -> Result<()>;

    /// Close the connection and wait until the close has completed.
    /// Safe to call on an already closed connection.
    async fn close(&self);

    /// The endpoint this connection was dialed against
    fn remote_endpoint(&self) -> Endpoint;

    /// Attach liveness callbacks to this connection.
    ///
    /// Attachment happens-before any deactivation delivery: a drop that
    /// occurred between dialing and attaching is delivered immediately
    /// rather than lost.
    fn subscribe_liveness(&self, observer: LivenessObserver);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_observer(up: &Arc<AtomicU32>, down: &Arc<AtomicU32>) -> LivenessObserver {
        let up = Arc::clone(up);
        let down = Arc::clone(down);
        LivenessObserver::new(
            move || {
                up.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                down.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("127.0.0.1", 12345);
        assert_eq!(endpoint.to_string(), "127.0.0.1:12345");
    }

    #[test]
    fn test_slot_delivers_deactivation_once() {
        let slot = LivenessSlot::new();
        let up = Arc::new(AtomicU32::new(0));
        let down = Arc::new(AtomicU32::new(0));

        slot.attach(counting_observer(&up, &down));
        assert_eq!(up.load(Ordering::SeqCst), 1);
        assert_eq!(down.load(Ordering::SeqCst), 0);

        slot.fire_deactivated();
        slot.fire_deactivated();
        assert_eq!(down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_delivers_missed_deactivation_at_attach() {
        let slot = LivenessSlot::new();
        let up = Arc::new(AtomicU32::new(0));
        let down = Arc::new(AtomicU32::new(0));

        slot.fire_deactivated();
        slot.attach(counting_observer(&up, &down));

        assert_eq!(up.load(Ordering::SeqCst), 1);
        assert_eq!(down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_recording() {
        let mut stats = LinkStats::default();
        stats.record_connected();
        stats.record_failed_dial();
        stats.record_drop();
        stats.record_redial();

        assert_eq!(stats.dial_attempts, 2);
        assert_eq!(stats.successful_connects, 1);
        assert_eq!(stats.failed_dials, 1);
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.redials, 1);
        assert!(stats.last_connected.is_some());
    }
}
