//! Integration tests for the relaygate server.
//!
//! These tests drive the complete flow over real sockets:
//! - request parsing and token authentication
//! - admission (burst guard, connection-cap latch)
//! - CONNECT tunnels with byte accounting
//! - direct node forwarding
//! - gateway job dispatch and response correlation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use relaygate_auth::{AllowSet, ReloadableTokens};
use relaygate_config::Config;
use relaygate_core::{epoch_secs, RelayNode};
use relaygate_server::{run_with_shutdown, CancellationToken, Frame};
use relaygate_store::{MemoryStore, SessionHandle, Store};

const TOKEN: &str = "TEST-TOKEN-123";
/// base64("TEST-TOKEN-123:")
const TOKEN_BASIC: &str = "Basic VEVTVC1UT0tFTi0xMjM6";

// ============================================================================
// Test Helpers
// ============================================================================

/// A TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
}

impl MockEchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        Self { addr }
    }
}

/// A TCP server that answers every connection with a fixed response.
struct MockHttpServer {
    addr: SocketAddr,
}

impl MockHttpServer {
    async fn start(response: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        Self { addr }
    }
}

async fn free_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

struct TestServer {
    addr: SocketAddr,
    gateway_addr: Option<SocketAddr>,
    store: Arc<MemoryStore>,
    shutdown: CancellationToken,
}

struct TestServerOptions {
    nodes: Vec<RelayNode>,
    gateway: bool,
    burst_cooldown_secs: u64,
    max_connections_per_token: i64,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            gateway: false,
            burst_cooldown_secs: 0,
            max_connections_per_token: 100,
        }
    }
}

impl TestServer {
    async fn start(options: TestServerOptions) -> Self {
        let addr = free_port().await;
        let gateway_addr = if options.gateway {
            Some(free_port().await)
        } else {
            None
        };

        let mut config: Config = toml::from_str(&format!(
            r#"
            [server]
            listen = "{addr}"
            dial_retry_delay_secs = 0

            [limits]
            max_connections_per_token = {max_conns}
            burst_cooldown_secs = {cooldown}

            [store]
            seed_tokens = ["{TOKEN}"]
            "#,
            max_conns = options.max_connections_per_token,
            cooldown = options.burst_cooldown_secs,
        ))
        .unwrap();
        config.server.gateway_listen = gateway_addr.map(|a| a.to_string());

        let store = Arc::new(MemoryStore::with_seed([TOKEN], options.nodes));
        let tokens = Arc::new(ReloadableTokens::new(AllowSet::from_tokens(
            store.load_active_tokens().await.unwrap(),
        )));

        let shutdown = CancellationToken::new();
        let server_store: Arc<dyn Store> = store.clone();
        tokio::spawn(run_with_shutdown(
            config,
            server_store,
            tokens,
            shutdown.clone(),
        ));

        // Wait for the accept loop to come up.
        for _ in 0..100 {
            if TcpStream::connect(addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            addr,
            gateway_addr,
            store,
            shutdown,
        }
    }

    async fn send_request(&self, request: &str) -> TcpStream {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        stream
    }

    async fn request_status(&self, request: &str) -> String {
        let mut stream = self.send_request(request).await;
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]).into_owned();
        response.lines().next().unwrap_or_default().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn connect_request(target: &str) -> String {
    format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Authorization: {TOKEN_BASIC}\r\n\r\n"
    )
}

// ============================================================================
// CONNECT Tunnels
// ============================================================================

#[tokio::test]
async fn connect_tunnel_relays_and_accounts_bytes() {
    let echo = MockEchoServer::start().await;
    let server = TestServer::start(TestServerOptions::default()).await;

    let mut stream = server.send_request(&connect_request(&echo.addr.to_string())).await;

    // 200 must arrive before any tunneled byte.
    let mut buf = vec![0u8; 256];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(
        &buf[..n],
        b"HTTP/1.1 200 Connection Established\r\n\r\n".as_slice()
    );

    stream.write_all(b"hello").await.unwrap();
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello");

    // Close our side; the tunnel ends and accounting lands in the store.
    drop(stream);
    for _ in 0..100 {
        if server.store.closed_session_bytes(SessionHandle(1)).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        server.store.closed_session_bytes(SessionHandle(1)),
        Some((5, 5))
    );
}

#[tokio::test]
async fn connect_to_unreachable_destination_is_502() {
    let server = TestServer::start(TestServerOptions::default()).await;
    // Port 1 is essentially never listening on loopback.
    let status = server.request_status(&connect_request("127.0.0.1:1")).await;
    assert_eq!(status, "HTTP/1.1 502 Bad Gateway");
}

// ============================================================================
// Authentication and Admission
// ============================================================================

#[tokio::test]
async fn unknown_token_is_403() {
    let server = TestServer::start(TestServerOptions::default()).await;
    let status = server
        .request_status(
            "CONNECT example.com:443 HTTP/1.1\r\n\
             Host: example.com:443\r\n\
             X-Proxy-Token: WRONG-TOKEN\r\n\r\n",
        )
        .await;
    assert_eq!(status, "HTTP/1.1 403 Forbidden");
}

#[tokio::test]
async fn missing_token_is_403() {
    let server = TestServer::start(TestServerOptions::default()).await;
    let status = server
        .request_status("CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
        .await;
    assert_eq!(status, "HTTP/1.1 403 Forbidden");
}

#[tokio::test]
async fn malformed_authorization_is_400() {
    let server = TestServer::start(TestServerOptions::default()).await;
    let status = server
        .request_status(
            "CONNECT example.com:443 HTTP/1.1\r\n\
             Host: example.com:443\r\n\
             Proxy-Authorization: Basic %%%\r\n\r\n",
        )
        .await;
    assert_eq!(status, "HTTP/1.1 400 Bad Request");
}

#[tokio::test]
async fn malformed_request_line_is_400() {
    let server = TestServer::start(TestServerOptions::default()).await;
    let status = server.request_status("GARBAGE\r\n\r\n").await;
    assert_eq!(status, "HTTP/1.1 400 Bad Request");
}

#[tokio::test]
async fn token_header_is_accepted() {
    let echo = MockEchoServer::start().await;
    let server = TestServer::start(TestServerOptions::default()).await;
    let status = server
        .request_status(&format!(
            "CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\nX-Proxy-Token: {TOKEN}\r\n\r\n",
            addr = echo.addr
        ))
        .await;
    assert_eq!(status, "HTTP/1.1 200 Connection Established");
}

#[tokio::test]
async fn burst_guard_throttles_rapid_requests() {
    let echo = MockEchoServer::start().await;
    let server = TestServer::start(TestServerOptions {
        burst_cooldown_secs: 1,
        ..Default::default()
    })
    .await;

    let request = connect_request(&echo.addr.to_string());
    let first = server.request_status(&request).await;
    assert_eq!(first, "HTTP/1.1 200 Connection Established");

    let second = server.request_status(&request).await;
    assert_eq!(second, "HTTP/1.1 429 Too Many Requests");
}

#[tokio::test]
async fn connection_cap_latches_and_rejects_with_429() {
    let echo = MockEchoServer::start().await;
    let server = TestServer::start(TestServerOptions {
        max_connections_per_token: 1,
        ..Default::default()
    })
    .await;

    let request = connect_request(&echo.addr.to_string());

    // Two concurrent tunnels admitted; the second pushes active past the cap.
    let mut first = server.send_request(&request).await;
    let mut buf = vec![0u8; 256];
    first.read(&mut buf).await.unwrap();
    let mut second = server.send_request(&request).await;
    second.read(&mut buf).await.unwrap();

    // Third attempt sees active_connections > cap, latches, and is rejected.
    let status = server.request_status(&request).await;
    assert_eq!(status, "HTTP/1.1 429 Too Many Requests");

    // Even after the tunnels close, the latch holds.
    drop(first);
    drop(second);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = server.request_status(&request).await;
    assert_eq!(status, "HTTP/1.1 429 Too Many Requests");
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn forward_without_nodes_is_502() {
    let server = TestServer::start(TestServerOptions::default()).await;
    let mut stream = server
        .send_request(&format!(
            "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nX-Proxy-Token: {TOKEN}\r\n\r\n"
        ))
        .await;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway"));
    assert!(response.contains("No nodes available"));
}

#[tokio::test]
async fn forward_reemits_request_through_node() {
    let node = MockHttpServer::start("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    let server = TestServer::start(TestServerOptions {
        nodes: vec![RelayNode::new(
            node.addr.ip().to_string(),
            node.addr.port(),
            true,
            epoch_secs(),
        )],
        ..Default::default()
    })
    .await;

    let mut stream = server
        .send_request(&format!(
            "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nX-Proxy-Token: {TOKEN}\r\n\r\n"
        ))
        .await;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("ok"));
}

// ============================================================================
// Gateway
// ============================================================================

#[tokio::test]
async fn gateway_job_round_trip() {
    // The node never listens on TCP; only its control channel matters.
    let node_endpoint = free_port().await;
    let server = TestServer::start(TestServerOptions {
        nodes: vec![RelayNode::new(
            node_endpoint.ip().to_string(),
            node_endpoint.port(),
            true,
            epoch_secs(),
        )],
        gateway: true,
        ..Default::default()
    })
    .await;

    // Node opens its control channel and registers under its endpoint id.
    let gateway_addr = server.gateway_addr.unwrap();
    let tcp = TcpStream::connect(gateway_addr).await.unwrap();
    let (mut ws, _) = tokio_tungstenite::client_async("ws://gateway/", tcp)
        .await
        .unwrap();
    ws.send(Message::Text(
        serde_json::to_string(&Frame::Register {
            token: node_endpoint.to_string(),
        })
        .unwrap(),
    ))
    .await
    .unwrap();
    // Give the registry a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Client sends a forward request; it becomes a job.
    let mut stream = server
        .send_request(&format!(
            "GET http://example.com/data HTTP/1.1\r\nHost: example.com\r\nX-Proxy-Token: {TOKEN}\r\n\r\n"
        ))
        .await;

    let msg = ws.next().await.unwrap().unwrap();
    let frame: Frame = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    let job_id = match frame {
        Frame::Request {
            job_id,
            method,
            url,
            headers,
            ..
        } => {
            assert_eq!(method, "GET");
            assert_eq!(url, "http://example.com/data");
            assert_eq!(headers.get("Host").map(String::as_str), Some("example.com"));
            job_id
        }
        other => panic!("expected request frame, got {other:?}"),
    };

    // Node answers; the gateway writes the response back to the client.
    ws.send(Message::Text(
        serde_json::to_string(&Frame::Response {
            job_id,
            status_code: 200,
            body: "payload".into(),
        })
        .unwrap(),
    ))
    .await
    .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&response),
        "HTTP/1.1 200\r\nContent-Length: 7\r\n\r\npayload"
    );
}
