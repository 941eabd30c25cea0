//! End-to-end tests: real sockets in front of and behind the proxy.

use std::time::Duration;

use forward_proxy::config::ProxyConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::BOUND;

#[tokio::test]
async fn get_is_relayed_with_status_headers_and_body() {
    let (origin, mut requests) =
        common::start_origin("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello").await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let response = common::proxied_client(proxy.addr)
        .get(format!("http://{origin}/greeting"))
        .send()
        .await
        .expect("proxy unreachable");

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["content-length"], "5");
    assert_eq!(response.text().await.unwrap(), "hello");

    // The origin saw an origin-form request line.
    let seen = requests.recv().await.unwrap();
    assert!(seen.starts_with("GET /greeting HTTP/1.1\r\n"), "{seen}");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn raw_get_keeps_header_case_and_duplicates() {
    let (origin, _requests) = common::start_origin(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Trace: a\r\nX-Trace: b\r\nContent-Length: 5\r\n\r\nhello",
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(
            format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n").as_bytes(),
        )
        .await
        .unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(BOUND, client.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(raw.contains("\r\nContent-Type: text/plain\r\n"), "{raw}");
    let first = raw.find("X-Trace: a").expect("first value");
    let second = raw.find("X-Trace: b").expect("second value");
    assert!(first < second);
    assert!(raw.ends_with("\r\n\r\nhello"));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn post_body_reaches_origin() {
    let (origin, mut requests) =
        common::start_origin("HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n").await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let response = common::proxied_client(proxy.addr)
        .post(format!("http://{origin}/submit"))
        .header("X-Custom", "kept")
        .body("payload=1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let seen = requests.recv().await.unwrap();
    assert!(seen.starts_with("POST /submit HTTP/1.1\r\n"), "{seen}");
    assert!(seen.to_ascii_lowercase().contains("x-custom: kept"), "{seen}");
    assert!(seen.ends_with("payload=1"), "{seen}");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn get_to_unreachable_origin_is_503_with_error_text() {
    let origin = common::closed_addr().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let response = common::proxied_client(proxy.addr)
        .get(format!("http://{origin}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    assert!(!response.text().await.unwrap().is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn connect_tunnel_echoes_bytes_unmodified() {
    let echo = common::start_echo_server().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let (mut tunnel, head) = common::connect_through(proxy.addr, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert_eq!(head.matches("HTTP/1.1").count(), 1);
    assert!(!head.to_ascii_lowercase().contains("transfer-encoding"), "{head}");

    // Arbitrary binary payload, including things that look like HTTP.
    let payload: Vec<u8> = b"GET / HTTP/1.1\r\n\r\n"
        .iter()
        .copied()
        .chain((0u8..=255).cycle().take(64 * 1024))
        .collect();
    let mut echoed = vec![0u8; payload.len()];

    let (mut reader, mut writer) = tunnel.split();
    let write = async {
        writer.write_all(&payload).await.unwrap();
    };
    let read = async {
        reader.read_exact(&mut echoed).await.unwrap();
    };
    tokio::time::timeout(BOUND, async { tokio::join!(write, read) })
        .await
        .unwrap();
    assert_eq!(echoed, payload);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn tunnel_closes_when_client_half_closes() {
    let echo = common::start_echo_server().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let (mut tunnel, _) = common::connect_through(proxy.addr, &echo.to_string()).await;
    tunnel.write_all(b"last words").await.unwrap();
    let mut echoed = [0u8; 10];
    tokio::time::timeout(BOUND, tunnel.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"last words");

    // End-of-stream from the client tears down both directions.
    tunnel.shutdown().await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(BOUND, tunnel.read_to_end(&mut rest))
        .await
        .expect("tunnel should close")
        .unwrap();
    assert!(rest.is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn open_tunnel_counts_against_connection_limit() {
    let echo = common::start_echo_server().await;
    let mut config = ProxyConfig::default();
    config.listener.max_connections = 1;
    let proxy = common::start_proxy(config).await;

    let (mut tunnel, head) = common::connect_through(proxy.addr, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    tunnel.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(BOUND, tunnel.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // The kernel completes the handshake, but the proxy does not serve it.
    let mut waiting = TcpStream::connect(proxy.addr).await.unwrap();
    waiting
        .write_all(format!("CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let blocked =
        tokio::time::timeout(Duration::from_millis(500), common::read_head(&mut waiting)).await;
    assert!(blocked.is_err(), "second connection served while tunnel held the only slot");

    // Closing the tunnel frees the slot for the waiting client.
    drop(tunnel);
    let head = tokio::time::timeout(BOUND, common::read_head(&mut waiting))
        .await
        .expect("slot should be released when the tunnel closes");
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn connect_to_closed_port_is_503() {
    let target = common::closed_addr().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let (mut stream, head) = common::connect_through(proxy.addr, &target.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{head}");

    let mut body = vec![0u8; "dial tcp".len()];
    stream.read_exact(&mut body).await.unwrap();
    assert_eq!(body, b"dial tcp");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn failed_request_does_not_affect_open_tunnel() {
    let echo = common::start_echo_server().await;
    let dead = common::closed_addr().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let (mut tunnel, _) = common::connect_through(proxy.addr, &echo.to_string()).await;

    // A client that disconnects mid-request and a failing CONNECT.
    let mut rude = TcpStream::connect(proxy.addr).await.unwrap();
    rude.write_all(b"GET http://127.0.0.1/ HTTP/1.1\r\nHo").await.unwrap();
    drop(rude);
    let (_failed, head) = common::connect_through(proxy.addr, &dead.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 503"));

    tunnel.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    tokio::time::timeout(BOUND, tunnel.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"still here");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    assert_eq!(proxy.shutdown.trigger(), 1);
    tokio::time::timeout(Duration::from_secs(10), proxy.task)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(proxy.addr).await.is_err());
}
