//! Persistent connection controller
//!
//! Keeps one application-level link alive across network blips and remote
//! restarts. Every successful dial attaches a liveness observer before the
//! connection is handed over, and every unintentional drop re-arms a
//! retry-until-success dial round with the policy in effect, until an
//! explicit [`TcpClient::disconnect`] withdraws the standing intent.
//!
//! Drop notifications and explicit calls are serialized through one event
//! task plus a single state lock; a generation counter rejects stale
//! notifications and connections established by superseded dial rounds.

use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::retry::{Retrier, RetryHandle, RetryPolicy};
use crate::transport::traits::{
    Connection, Endpoint, LinkState, LinkStats, LivenessObserver, Transport,
};

enum LinkEvent {
    Down { seq: u64, endpoint: Endpoint },
}

struct ClientInner {
    /// Endpoint last dialed
    endpoint: Option<Endpoint>,
    /// Standing intent to redial after an unintentional drop
    persistence: bool,
    /// Current live connection, exclusively owned
    active: Option<Box<dyn Connection>>,
    /// Generation of the current dial round / connection
    dial_seq: u64,
    /// Retry policy in effect for drop-triggered redials
    policy: RetryPolicy,
    state: LinkState,
    stats: LinkStats,
}

/// Client maintaining a persistent connection to one remote endpoint
///
/// Independent per instance; no process-wide shared state. Must be created
/// within a Tokio runtime.
pub struct TcpClient {
    transport: Arc<dyn Transport>,
    inner: Arc<Mutex<ClientInner>>,
    retrier: Arc<Retrier>,
    events: mpsc::UnboundedSender<LinkEvent>,
    event_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl TcpClient {
    /// Create a client over the given transport with the default retry policy
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_policy(transport, RetryPolicy::default())
    }

    /// Create a client with an explicit default retry policy
    ///
    /// The policy governs drop-triggered redials until a
    /// [`connect_until_success`](Self::connect_until_success) call overrides
    /// it.
    pub fn with_policy(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(ClientInner {
            endpoint: None,
            persistence: true,
            active: None,
            dial_seq: 0,
            policy,
            state: LinkState::Disconnected,
            stats: LinkStats::default(),
        }));
        let retrier = Arc::new(Retrier::new());

        let event_task = tokio::spawn(run_event_loop(
            events_rx,
            Arc::clone(&inner),
            Arc::clone(&transport),
            Arc::clone(&retrier),
            events_tx.clone(),
        ));

        Self {
            transport,
            inner,
            retrier,
            events: events_tx,
            event_task: SyncMutex::new(Some(event_task)),
        }
    }

    /// Perform exactly one dial attempt and wait for its outcome.
    ///
    /// Re-enables persistence as a side effect. On success the liveness
    /// observer is attached and the connection stored before this returns,
    /// so no drop can be missed. Cancels any in-flight retry task: an
    /// explicit call wins over a running round.
    pub async fn connect_once(&self, host: &str, port: u16) -> bool {
        let endpoint = Endpoint::new(host, port);
        self.retrier.cancel();

        let seq = {
            let mut inner = self.inner.lock().await;
            inner.persistence = true;
            inner.endpoint = Some(endpoint.clone());
            inner.state = LinkState::Connecting;
            inner.dial_seq += 1;
            inner.dial_seq
        };

        let connected = dial_and_store(
            Arc::clone(&self.transport),
            Arc::clone(&self.inner),
            self.events.clone(),
            endpoint,
            seq,
        )
        .await;

        if !connected {
            let mut inner = self.inner.lock().await;
            if inner.dial_seq == seq && inner.state == LinkState::Connecting {
                inner.state = LinkState::Disconnected;
            }
        }
        connected
    }

    /// Dial repeatedly on the policy's fixed interval until one attempt
    /// succeeds or the budget runs out.
    ///
    /// Returns immediately with a handle the caller can wait on or poll.
    /// Each attempt performs the same dial-then-attach sequence as
    /// [`connect_once`](Self::connect_once). The policy also becomes the one
    /// used for subsequent drop-triggered redials. A call made while another
    /// round is in flight replaces it; the superseded round resolves `false`.
    pub async fn connect_until_success(
        &self,
        host: &str,
        port: u16,
        policy: RetryPolicy,
    ) -> RetryHandle {
        let endpoint = Endpoint::new(host, port);
        let seq = {
            let mut inner = self.inner.lock().await;
            inner.persistence = true;
            inner.policy = policy.clone();
            inner.endpoint = Some(endpoint.clone());
            inner.state = LinkState::Connecting;
            inner.dial_seq += 1;
            inner.dial_seq
        };

        start_retry(
            Arc::clone(&self.transport),
            Arc::clone(&self.inner),
            &self.retrier,
            self.events.clone(),
            endpoint,
            policy,
            seq,
        )
    }

    /// Drop the standing reconnect intent and close the active connection.
    ///
    /// Persistence is withdrawn before the close so the resulting liveness
    /// notification is classified as intentional. Stops any in-flight retry
    /// task and waits for the close to complete. No-op when already
    /// disconnected. After this returns, no connection attempt occurs until
    /// an explicit dial call.
    pub async fn disconnect(&self) {
        {
            self.inner.lock().await.persistence = false;
        }
        self.retrier.stop().await;

        let connection = {
            let mut inner = self.inner.lock().await;
            inner.state = LinkState::Disconnected;
            inner.active.take()
        };
        if let Some(connection) = connection {
            connection.close().await;
            info!("Disconnected from {}", connection.remote_endpoint());
        }
    }

    /// Submit one message on the active connection
    pub async fn send(&self, line: &str) -> Result<()> {
        let inner = self.inner.lock().await;
        match inner.active.as_ref() {
            Some(connection) => connection.send(line),
            None => Err(LinkError::NotConnected),
        }
    }

    /// Current state of the link
    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    /// Whether a connection is currently active
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.active.is_some()
    }

    /// Endpoint last dialed, if any
    pub async fn remote_endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().await.endpoint.clone()
    }

    /// Snapshot of link statistics
    pub async fn stats(&self) -> LinkStats {
        self.inner.lock().await.stats.clone()
    }

    /// Disconnect and terminate the controller's event task
    pub async fn shutdown(&self) {
        self.disconnect().await;
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.retrier.cancel();
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

/// One dial attempt followed by observer attachment and hand-over.
///
/// The store step re-checks persistence and the dial generation under the
/// state lock: a connection established by a superseded or cancelled round
/// is closed instead of installed.
async fn dial_and_store(
    transport: Arc<dyn Transport>,
    inner: Arc<Mutex<ClientInner>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    endpoint: Endpoint,
    seq: u64,
) -> bool {
    match transport.dial(&endpoint).await {
        Ok(connection) => {
            let mut guard = inner.lock().await;
            if !guard.persistence || guard.dial_seq != seq {
                drop(guard);
                debug!("Discarding connection to {endpoint} established after cancellation");
                connection.close().await;
                return false;
            }

            let up_endpoint = endpoint.clone();
            let down_endpoint = endpoint.clone();
            connection.subscribe_liveness(LivenessObserver::new(
                move || debug!("Connection to {up_endpoint} active"),
                move || {
                    let _ = events.send(LinkEvent::Down {
                        seq,
                        endpoint: down_endpoint,
                    });
                },
            ));

            guard.active = Some(connection);
            guard.endpoint = Some(endpoint.clone());
            guard.state = LinkState::Connected;
            guard.stats.record_connected();
            info!("Connected to {endpoint}");
            true
        }
        Err(e) => {
            debug!("Dial attempt to {endpoint} failed: {e}");
            inner.lock().await.stats.record_failed_dial();
            false
        }
    }
}

fn start_retry(
    transport: Arc<dyn Transport>,
    inner: Arc<Mutex<ClientInner>>,
    retrier: &Retrier,
    events: mpsc::UnboundedSender<LinkEvent>,
    endpoint: Endpoint,
    policy: RetryPolicy,
    seq: u64,
) -> RetryHandle {
    let attempt = {
        let inner = Arc::clone(&inner);
        move || {
            dial_and_store(
                Arc::clone(&transport),
                Arc::clone(&inner),
                events.clone(),
                endpoint.clone(),
                seq,
            )
        }
    };
    let handle = retrier.begin(attempt, policy);

    // A round that ends without a link leaves Connecting
    let watcher = handle.clone();
    tokio::spawn(async move {
        if !watcher.wait().await {
            let mut guard = inner.lock().await;
            if guard.dial_seq == seq && guard.state == LinkState::Connecting {
                guard.state = LinkState::Disconnected;
            }
        }
    });

    handle
}

async fn run_event_loop(
    mut events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    inner: Arc<Mutex<ClientInner>>,
    transport: Arc<dyn Transport>,
    retrier: Arc<Retrier>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            LinkEvent::Down { seq, endpoint } => {
                handle_drop(&inner, &transport, &retrier, &events_tx, seq, endpoint).await;
            }
        }
    }
}

async fn handle_drop(
    inner: &Arc<Mutex<ClientInner>>,
    transport: &Arc<dyn Transport>,
    retrier: &Retrier,
    events: &mpsc::UnboundedSender<LinkEvent>,
    seq: u64,
    endpoint: Endpoint,
) {
    let (redial_seq, policy) = {
        let mut guard = inner.lock().await;
        if guard.dial_seq != seq {
            debug!("Ignoring stale drop notification for {endpoint}");
            return;
        }
        guard.active = None;
        guard.state = LinkState::Disconnected;
        guard.stats.record_drop();

        if !guard.persistence {
            info!("Link to {endpoint} closed");
            return;
        }

        guard.stats.record_redial();
        guard.state = LinkState::Connecting;
        guard.dial_seq += 1;
        (guard.dial_seq, guard.policy.clone())
    };

    warn!("Connection to {endpoint} lost, redialing");
    let _ = start_retry(
        Arc::clone(transport),
        Arc::clone(inner),
        retrier,
        events.clone(),
        endpoint,
        policy,
        redial_seq,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;
    use tokio::time;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::forever(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let client = TcpClient::new(Arc::new(MockTransport::new()));
        assert!(matches!(
            client.send("Hello").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_once_establishes_link() {
        let mock = Arc::new(MockTransport::new());
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        assert!(client.connect_once("127.0.0.1", 9000).await);
        assert!(client.is_connected().await);
        assert_eq!(client.state().await, LinkState::Connected);

        client.send("Hello").await.unwrap();
        let connection = mock.last_connection().unwrap();
        assert_eq!(connection.sent_lines(), vec!["Hello".to_string()]);

        let stats = client.stats().await;
        assert_eq!(stats.successful_connects, 1);
    }

    #[tokio::test]
    async fn test_connect_once_failure_leaves_disconnected() {
        let mock = Arc::new(MockTransport::failing_first(1));
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        assert!(!client.connect_once("127.0.0.1", 9000).await);
        assert!(!client.is_connected().await);
        assert_eq!(client.state().await, LinkState::Disconnected);
        assert_eq!(client.stats().await.failed_dials, 1);
    }

    #[tokio::test]
    async fn test_connect_until_success_retries_until_listener_appears() {
        let mock = Arc::new(MockTransport::failing_first(3));
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        let handle = client
            .connect_until_success("127.0.0.1", 9000, fast_policy())
            .await;

        assert!(handle.wait().await);
        assert_eq!(mock.dial_count(), 4);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_drop_triggers_redial_to_same_endpoint() {
        let mock = Arc::new(MockTransport::new());
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        let handle = client
            .connect_until_success("127.0.0.1", 9000, fast_policy())
            .await;
        assert!(handle.wait().await);

        mock.last_connection().unwrap().trigger_drop();
        time::sleep(Duration::from_millis(200)).await;

        assert!(client.is_connected().await);
        assert_eq!(mock.dial_count(), 2);
        let reconnected = mock.last_connection().unwrap();
        assert_eq!(reconnected.endpoint(), Endpoint::new("127.0.0.1", 9000));

        let stats = client.stats().await;
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.redials, 1);
    }

    #[tokio::test]
    async fn test_disconnect_prevents_further_redial() {
        let mock = Arc::new(MockTransport::new());
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        let handle = client
            .connect_until_success("127.0.0.1", 9000, fast_policy())
            .await;
        assert!(handle.wait().await);

        client.disconnect().await;
        time::sleep(Duration::from_millis(200)).await;

        assert!(!client.is_connected().await);
        assert_eq!(client.state().await, LinkState::Disconnected);
        assert_eq!(mock.dial_count(), 1);
        assert!(mock.last_connection().unwrap().is_closed());

        // Persistence returns with the next explicit dial
        assert!(client.connect_once("127.0.0.1", 9000).await);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_stale_drop_notification_ignored() {
        let mock = Arc::new(MockTransport::new());
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        assert!(client.connect_once("127.0.0.1", 9000).await);
        let first = mock.last_connection().unwrap();

        assert!(client.connect_once("127.0.0.1", 9001).await);
        first.trigger_drop();
        time::sleep(Duration::from_millis(200)).await;

        assert!(client.is_connected().await);
        assert_eq!(mock.dial_count(), 2);
        assert_eq!(
            client.remote_endpoint().await,
            Some(Endpoint::new("127.0.0.1", 9001))
        );
    }

    #[tokio::test]
    async fn test_overlapping_rounds_replace_each_other() {
        let mock = Arc::new(MockTransport::failing_first(1000));
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        let first = client
            .connect_until_success("127.0.0.1", 9000, fast_policy())
            .await;
        time::sleep(Duration::from_millis(50)).await;
        let second = client
            .connect_until_success("127.0.0.1", 9000, fast_policy())
            .await;

        assert!(!first.wait().await);
        assert_eq!(second.try_result(), None);
        assert_eq!(client.state().await, LinkState::Connecting);

        client.disconnect().await;
        assert_eq!(client.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_bounded_round_exhaustion_leaves_disconnected() {
        let mock = Arc::new(MockTransport::failing_first(1000));
        let client = TcpClient::new(Arc::clone(&mock) as Arc<dyn Transport>);

        let handle = client
            .connect_until_success(
                "127.0.0.1",
                9000,
                RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(20)),
            )
            .await;

        assert!(!handle.wait().await);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.state().await, LinkState::Disconnected);
        assert_eq!(client.stats().await.successful_connects, 0);
    }
}
