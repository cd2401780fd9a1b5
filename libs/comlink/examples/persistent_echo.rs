//! Persistent echo demo
//!
//! Starts an echo server, connects a persistent client, then restarts the
//! server mid-run. The client reconnects on its own and keeps echoing.
//!
//! Run with: cargo run --example persistent_echo

use anyhow::Result;
use comlink::{EchoHandler, ForwardHandler, RetryPolicy, TcpClient, TcpServer, TcpTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let server = TcpServer::new(Arc::new(EchoHandler));
    server.start("127.0.0.1", 5000).await?;

    let (handler, mut queue) = ForwardHandler::new();
    let transport = TcpTransport::with_defaults(Arc::new(handler));
    let client = TcpClient::new(Arc::new(transport));

    let policy = RetryPolicy::forever(Duration::from_millis(100));
    let handle = client.connect_until_success("127.0.0.1", 5000, policy).await;
    handle.wait().await;

    for n in 0..3 {
        client.send(&format!("ping {n}")).await?;
        println!("echo: {:?}", queue.recv().await);
        time::sleep(Duration::from_millis(300)).await;
    }

    println!("restarting server...");
    server.shutdown().await;
    time::sleep(Duration::from_secs(1)).await;
    server.start("127.0.0.1", 5000).await?;

    // No reconnect call: the client re-establishes the link on its own
    while !client.is_connected().await {
        time::sleep(Duration::from_millis(50)).await;
    }

    for n in 3..6 {
        client.send(&format!("ping {n}")).await?;
        println!("echo: {:?}", queue.recv().await);
        time::sleep(Duration::from_millis(300)).await;
    }

    client.disconnect().await;
    server.shutdown().await;
    Ok(())
}
