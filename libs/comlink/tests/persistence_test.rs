//! Persistent connection integration tests
//!
//! Exercises the controller against a real in-process TCP echo server:
//! dialing before the server exists, surviving a server restart, and the
//! disconnect contract.

use comlink::{
    EchoHandler, ForwardHandler, LinkError, LinkState, RetryPolicy, TcpClient, TcpServer,
    TcpTransport,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;

fn echo_server() -> TcpServer {
    TcpServer::new(Arc::new(EchoHandler))
}

fn forwarding_client() -> (TcpClient, mpsc::UnboundedReceiver<String>) {
    let (handler, queue) = ForwardHandler::new();
    let transport = TcpTransport::with_defaults(Arc::new(handler));
    (TcpClient::new(Arc::new(transport)), queue)
}

async fn recv_within(
    queue: &mut mpsc::UnboundedReceiver<String>,
    limit: Duration,
) -> Option<String> {
    time::timeout(limit, queue.recv()).await.ok().flatten()
}

async fn wait_connected(client: &TcpClient, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if client.is_connected().await {
            return true;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persistent_dial_connects_once_server_appears() {
    let server = echo_server();
    let (client, mut queue) = forwarding_client();

    // Dialing starts before any listener exists
    let handle = client
        .connect_until_success(
            "127.0.0.1",
            12501,
            RetryPolicy::forever(Duration::from_millis(100)),
        )
        .await;

    time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(handle.try_result(), None);

    server.start("127.0.0.1", 12501).await.unwrap();
    let resolved = time::timeout(Duration::from_secs(2), handle.wait()).await;
    assert_eq!(resolved.ok(), Some(true));

    client.send("Hello").await.unwrap();
    assert_eq!(
        recv_within(&mut queue, Duration::from_secs(2)).await,
        Some("Hello".to_string())
    );

    client.disconnect().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnects_after_server_restart_without_caller_action() {
    let server = echo_server();
    server.start("127.0.0.1", 12502).await.unwrap();
    let (client, mut queue) = forwarding_client();

    let handle = client
        .connect_until_success(
            "127.0.0.1",
            12502,
            RetryPolicy::forever(Duration::from_millis(100)),
        )
        .await;
    assert!(handle.wait().await);

    server.shutdown().await;
    time::sleep(Duration::from_millis(200)).await;

    // During the gap a send is rejected or lost, never echoed
    let _ = client.send("lost").await;
    assert_eq!(recv_within(&mut queue, Duration::from_secs(1)).await, None);

    server.start("127.0.0.1", 12502).await.unwrap();
    assert!(wait_connected(&client, Duration::from_secs(2)).await);

    client.send("after-restart").await.unwrap();
    assert_eq!(
        recv_within(&mut queue, Duration::from_secs(2)).await,
        Some("after-restart".to_string())
    );
    assert!(server.accepted_connections() >= 1);

    client.disconnect().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_stops_auto_redial() {
    let server = echo_server();
    server.start("127.0.0.1", 12503).await.unwrap();
    let (client, _queue) = forwarding_client();

    let handle = client
        .connect_until_success(
            "127.0.0.1",
            12503,
            RetryPolicy::forever(Duration::from_millis(100)),
        )
        .await;
    assert!(handle.wait().await);
    assert_eq!(server.accepted_connections(), 1);

    client.disconnect().await;
    time::sleep(Duration::from_millis(500)).await;

    // The server stays reachable, yet no new attempt is made
    assert_eq!(client.state().await, LinkState::Disconnected);
    assert_eq!(server.accepted_connections(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_send_before_any_connection_fails() {
    let (client, _queue) = forwarding_client();
    assert!(matches!(
        client.send("Hello").await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bounded_dial_gives_up_when_no_listener() {
    let (client, _queue) = forwarding_client();

    let start = Instant::now();
    let handle = client
        .connect_until_success(
            "127.0.0.1",
            12504,
            RetryPolicy::new(Duration::from_millis(500), Duration::from_millis(100)),
        )
        .await;

    assert!(!handle.wait().await);
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(450),
        "gave up too early: {elapsed:?}"
    );
    assert!(
        elapsed <= Duration::from_secs(3),
        "gave up too late: {elapsed:?}"
    );

    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state().await, LinkState::Disconnected);
}
