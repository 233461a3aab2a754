use rand::Rng;
use relay_common::frame::{self, Frame, OP_CLOSE, OP_PING, OP_TEXT};
use relay_common::handshake;
use relayd::config::ServerConfig;
use relayd::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::TcpStream;

pub const TEST_TOKEN: &str = "integration-secret";
pub const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        token: TEST_TOKEN.to_string(),
        max_conns: 1000,
        upgrade_timeout: 5,
    }
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(test_config(addr)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = relayd::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

/// Client-side masked frame: mask bit set, payload XOR'd with a random key.
pub fn encode_masked(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let key: [u8; 4] = rand::thread_rng().gen();
    let unmasked = frame::encode(opcode, payload);
    let header_len = unmasked.len() - payload.len();
    let mut wire = unmasked[..header_len].to_vec();
    wire[1] |= 0x80;
    wire.extend_from_slice(&key);
    wire.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    wire
}

pub fn close_code_of(frame: &Frame) -> u16 {
    assert_eq!(frame.opcode, OP_CLOSE, "expected a close frame");
    u16::from_be_bytes([frame.payload[0], frame.payload[1]])
}

pub fn close_reason_of(frame: &Frame) -> String {
    String::from_utf8_lossy(&frame.payload[2..]).into_owned()
}

/// A raw-socket WebSocket client speaking just enough of the protocol
/// to exercise the relay end to end.
pub struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    /// Connects and performs the upgrade handshake, asserting the 101
    /// response carries the accept value for [`CLIENT_KEY`].
    pub async fn connect(addr: &SocketAddr, session: &str, role: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /ws?role={role}&sessionId={session}&token={TEST_TOKEN} HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let (head, leftover) = read_response_head(&mut stream).await;
        assert!(
            head.starts_with("HTTP/1.1 101"),
            "expected 101 response, got: {head}"
        );
        let expected = handshake::compute_accept(CLIENT_KEY);
        assert!(
            head.contains(&format!("Sec-WebSocket-Accept: {expected}")),
            "response missing computed accept header: {head}"
        );

        Self {
            stream,
            buf: leftover,
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_raw(&encode_masked(OP_TEXT, text.as_bytes())).await;
    }

    pub async fn send_ping(&mut self, payload: &[u8]) {
        self.send_raw(&encode_masked(OP_PING, payload)).await;
    }

    pub async fn send_close(&mut self, code: u16) {
        self.send_raw(&encode_masked(OP_CLOSE, &code.to_be_bytes())).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn recv_frame(&mut self) -> Frame {
        self.recv_frame_timeout(Duration::from_secs(5))
            .await
            .expect("timed out waiting for a frame")
    }

    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some((frame, consumed)) = frame::decode(&self.buf).unwrap() {
                    self.buf.drain(..consumed);
                    return Some(frame);
                }
                let mut chunk = [0u8; 4096];
                let n = self.stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return None;
                }
                self.buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Asserts the stream ends without any further frames arriving.
    pub async fn expect_eof(&mut self) {
        assert!(self.buf.is_empty(), "unconsumed bytes before eof");
        let mut chunk = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut chunk))
            .await
            .expect("timed out waiting for eof")
            .unwrap();
        assert_eq!(n, 0, "expected eof, got {n} bytes");
    }
}

/// Sends an upgrade request expected to be rejected and returns the full
/// HTTP response the server answered with.
pub async fn rejected_upgrade(addr: &SocketAddr, query: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws?{query} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Plain (non-upgrade) GET against the relay port.
pub async fn plain_get(addr: &SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Body of an HTTP response (everything past the blank line).
pub fn response_body(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map_or("", |(_, body)| body)
}

async fn read_response_head(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let leftover = buf.split_off(end + 4);
            return (head, leftover);
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "stream ended while reading response head");
        buf.extend_from_slice(&chunk[..n]);
    }
}
