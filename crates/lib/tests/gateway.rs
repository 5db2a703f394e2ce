//! Integration tests: start the gateway on a free port in front of a fake backend
//! listener, then drive it with a WebSocket client and plain HTTP requests.
//! Server tasks are left running when each test ends.

use bridge::config::Config;
use bridge::gateway;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_gateway(backend: String) -> u16 {
    let port = free_port();
    let mut config = Config::default();
    config.bridge.port = port;
    config.bridge.bind = "127.0.0.1".to_string();
    config.bridge.backend = backend;
    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return port;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway on port {} did not become healthy within 5s", port);
}

/// Fake backend plus a gateway in front of it.
async fn bridge_with_backend() -> (TcpListener, u16) {
    let backend = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let addr = backend.local_addr().expect("backend addr").to_string();
    let port = start_gateway(addr).await;
    (backend, port)
}

async fn connect(port: u16) -> Client {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .expect("websocket connect");
    ws
}

async fn accept(backend: &TcpListener) -> TcpStream {
    let (conn, _) = timeout(WAIT, backend.accept())
        .await
        .expect("backend accept timed out")
        .expect("backend accept");
    conn
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("no frame within 5s")
            .expect("websocket ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn expect_closed(ws: &mut Client) {
    loop {
        match timeout(WAIT, ws.next()).await.expect("websocket not closed within 5s") {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

async fn expect_eof(conn: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, conn.read(&mut buf))
        .await
        .expect("backend connection not closed within 5s")
        .expect("backend read");
    assert_eq!(n, 0, "unexpected backend data: {:?}", &buf[..n]);
}

#[tokio::test]
async fn health_reports_running_and_backend() {
    let port = start_gateway("127.0.0.1:5000".to_string()).await;
    let json: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{}/", port))
        .await
        .expect("GET /")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("backend").and_then(|v| v.as_str()), Some("127.0.0.1:5000"));
    assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
}

#[tokio::test]
async fn backend_line_arrives_as_text_frame() {
    let (backend, port) = bridge_with_backend().await;
    let mut ws = connect(port).await;
    let mut conn = accept(&backend).await;

    conn.write_all(b"Hello, world!\n").await.unwrap();
    assert_eq!(next_text(&mut ws).await, "Hello, world!");

    conn.write_all(b"fics% \r\nlogin: ").await.unwrap();
    conn.write_all(b"\xff\xfb\x01guest\r\n").await.unwrap();
    assert_eq!(next_text(&mut ws).await, "fics% ");
    assert_eq!(next_text(&mut ws).await, "login: guest");
}

#[tokio::test]
async fn browser_frames_reach_backend_verbatim() {
    let (backend, port) = bridge_with_backend().await;
    let mut ws = connect(port).await;
    let mut conn = accept(&backend).await;

    ws.send(Message::Text("finger\n".to_string())).await.unwrap();
    let mut buf = [0u8; 7];
    timeout(WAIT, conn.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"finger\n");

    ws.send(Message::Binary(b"moves\n".to_vec())).await.unwrap();
    let mut buf = [0u8; 6];
    timeout(WAIT, conn.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"moves\n");
}

#[tokio::test]
async fn backend_disconnect_closes_websocket() {
    let (backend, port) = bridge_with_backend().await;
    let mut ws = connect(port).await;
    let conn = accept(&backend).await;
    drop(conn);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn browser_close_closes_backend() {
    let (backend, port) = bridge_with_backend().await;
    let mut ws = connect(port).await;
    let mut conn = accept(&backend).await;
    ws.send(Message::Close(None)).await.unwrap();
    expect_eof(&mut conn).await;
}

#[tokio::test]
async fn message_at_read_limit_is_relayed() {
    let (backend, port) = bridge_with_backend().await;
    let mut ws = connect(port).await;
    let mut conn = accept(&backend).await;
    let limit = Config::default().bridge.read_limit;

    ws.send(Message::Text("y".repeat(limit))).await.unwrap();
    let mut buf = vec![0u8; limit];
    timeout(WAIT, conn.read_exact(&mut buf)).await.unwrap().unwrap();
    assert!(buf.iter().all(|&b| b == b'y'));

    ws.send(Message::Text("who\n".to_string())).await.unwrap();
    let mut buf = [0u8; 4];
    timeout(WAIT, conn.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"who\n");
}

#[tokio::test]
async fn oversized_message_ends_session() {
    let (backend, port) = bridge_with_backend().await;
    let mut ws = connect(port).await;
    let mut conn = accept(&backend).await;
    let _ = ws.send(Message::Text("x".repeat(4096))).await;
    expect_eof(&mut conn).await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn unreachable_backend_is_internal_server_error() {
    let port = start_gateway(format!("127.0.0.1:{}", free_port())).await;
    match connect_async(format!("ws://127.0.0.1:{}/ws", port)).await {
        Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status().as_u16(), 500),
        Err(e) => panic!("expected HTTP 500, got {}", e),
        Ok(_) => panic!("expected HTTP 500, got an upgraded socket"),
    }
}

#[tokio::test]
async fn non_get_is_method_not_allowed() {
    let port = start_gateway("127.0.0.1:5000".to_string()).await;
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/ws", port))
        .send()
        .await
        .expect("POST /ws");
    assert_eq!(resp.status().as_u16(), 405);
}

#[tokio::test]
async fn plain_get_is_bad_request() {
    let port = start_gateway("127.0.0.1:5000".to_string()).await;
    let resp = reqwest::get(format!("http://127.0.0.1:{}/ws", port))
        .await
        .expect("GET /ws");
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(resp.text().await.unwrap(), "unable to upgrade to websockets");
}
