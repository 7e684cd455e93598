use hive_stream::{HttpBackend, StreamBackend, StreamConfig, StreamError};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves exactly one request with the given status line and body, and hands
/// back the request line it received.
async fn serve_once(status: &'static str, body: &'static str) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&request);
        let _ = tx.send(text.lines().next().unwrap_or_default().to_string());

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.expect("write response");
        let _ = socket.shutdown().await;
    });

    (addr, rx)
}

fn backend(addr: SocketAddr) -> HttpBackend {
    let cfg = StreamConfig::default().with_base_url(&format!("http://{}/", addr));
    HttpBackend::new(&cfg).unwrap()
}

#[tokio::test]
async fn keep_alive_status_is_a_successful_poll() {
    let (addr, request) = serve_once(
        "220 Session Expiring",
        r#"[{"base":{"rootId":"c1","objectType":"case","operation":"Update"}}]"#,
    )
    .await;

    let response = backend(addr).poll("s1").await.unwrap();
    assert_eq!(response.status, 220);
    assert_eq!(response.events.len(), 1);
    assert_eq!(response.events[0].root_id(), "c1");
    assert_eq!(request.await.unwrap(), "GET /api/stream/s1 HTTP/1.1");
}

#[tokio::test]
async fn missing_session_keeps_its_status() {
    let (addr, _) = serve_once("404 Not Found", "").await;

    let err = backend(addr).poll("gone").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, StreamError::Status { status: 404, .. }));
}

#[tokio::test]
async fn unauthorized_poll_carries_body_as_message() {
    let (addr, _) = serve_once("401 Unauthorized", "Authentication required").await;

    let err = backend(addr).poll("s1").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.message(), "Authentication required");
}

#[tokio::test]
async fn create_session_accepts_plain_text_body() {
    let (addr, request) = serve_once("200 OK", "abc123").await;

    let id = backend(addr).create_session().await.unwrap();
    assert_eq!(id, "abc123");
    assert_eq!(request.await.unwrap(), "POST /api/stream HTTP/1.1");
}

#[tokio::test]
async fn create_session_accepts_json_string_body() {
    let (addr, _) = serve_once("200 OK", "\"abc123\"").await;

    assert_eq!(backend(addr).create_session().await.unwrap(), "abc123");
}

#[tokio::test]
async fn failed_user_refresh_reports_status() {
    let (addr, request) = serve_once("500 Internal Server Error", "boom").await;

    let err = backend(addr).refresh_user().await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(request.await.unwrap(), "GET /api/user/current HTTP/1.1");
}
