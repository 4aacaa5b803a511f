//! Lifecycle tests on the in-memory backend: the server answers HTTP on an
//! ephemeral port and shuts down cleanly when signalled.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use rollcall_server::{Application, Components, Config};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

fn memory_config() -> Config {
    let values: HashMap<String, String> = [
        ("ROLLCALL_BACKEND", "memory"),
        ("HOST", "127.0.0.1"),
        ("PORT", "0"),
        ("METRICS_PORT", "0"),
        ("PROCESSOR_WORKERS", "2"),
        ("SHUTDOWN_TIMEOUT", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Config::from_map(&values).expect("valid config")
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

#[tokio::test]
async fn test_serves_health_and_shuts_down() {
    let config = memory_config();
    let app = Application::with_components(config, Components::in_memory())
        .await
        .expect("build application");
    let addr = app.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"), "{health}");
    assert!(health.contains("\"status\":\"ok\""));

    let ready = http_get(addr, "/ready").await;
    assert!(ready.starts_with("HTTP/1.1 200"), "{ready}");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("shutdown timed out")
        .unwrap()
        .expect("clean shutdown");
}

#[tokio::test]
async fn test_unknown_event_is_not_found_over_http() {
    let app = Application::with_components(memory_config(), Components::in_memory())
        .await
        .expect("build application");
    let addr = app.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    let response = http_get(
        addr,
        "/api/v1/events/00000000-0000-0000-0000-000000000001/registrations/alice",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}
