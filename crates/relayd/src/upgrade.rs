//! HTTP request-head reading, parsing, and upgrade validation.
//!
//! The relay speaks just enough HTTP/1.1 to dispatch an inbound
//! connection: one request head is read off the raw socket, then the
//! connection either upgrades to the framed protocol, receives a plain
//! response (health endpoint, rejections), or is dropped.

use crate::error::RelaydError;
use relay_common::Role;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the request head; anything larger is rejected.
pub const MAX_HEAD_BYTES: usize = 8192;

/// A parsed HTTP/1.1 request head.
#[derive(Debug)]
pub struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request path without the query string.
    pub path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses the text of a request head (request line plus headers).
    pub fn parse(head: &str) -> Result<Self, RelaydError> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or(RelaydError::BadRequest("empty request line"))?
            .to_string();
        let target = parts
            .next()
            .ok_or(RelaydError::BadRequest("request line missing target"))?;

        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let query = query_string
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RelaydError::BadRequest("malformed header line"))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            method,
            path: path.to_string(),
            query,
            headers,
        })
    }

    /// First header with the given name (lower-case), if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First query parameter with the given name, if present.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether this request asks to upgrade to the WebSocket protocol.
    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }
}

/// Reads one request head off `reader`, up to and including the blank
/// line. Returns the parsed head plus any bytes the client already sent
/// past it (those belong to the framed stream and must not be lost).
pub async fn read_request_head<R>(reader: &mut R) -> Result<(RequestHead, Vec<u8>), RelaydError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = find_head_end(&buf) {
            let head_text = String::from_utf8_lossy(&buf[..end]).into_owned();
            let head = RequestHead::parse(&head_text)?;
            let leftover = buf.split_off(end + 4);
            return Ok((head, leftover));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(RelaydError::BadRequest("request head too large"));
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(RelaydError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Parameters of a validated upgrade request.
#[derive(Debug, PartialEq, Eq)]
pub struct UpgradeParams {
    /// Client's `Sec-WebSocket-Key` header value.
    pub key: String,
    /// Session the connection attaches to.
    pub session_id: String,
    /// Role the connection attaches as.
    pub role: Role,
}

/// A rejected upgrade: the HTTP status to answer with and the reason
/// body, which doubles as the metrics label.
#[derive(Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Full status-line tail, e.g. `"400 Bad Request"`.
    pub status: &'static str,
    /// Response body and log/metrics label.
    pub reason: &'static str,
}

/// Validates an upgrade request head against the configured token.
///
/// Requires a non-empty `Sec-WebSocket-Key` header, a non-empty
/// `sessionId` query parameter, a `role` parameter naming a [`Role`],
/// and a `token` parameter equal to the shared secret. Parameter
/// problems reject with 400 before the token is ever considered.
pub fn validate_upgrade(head: &RequestHead, token: &str) -> Result<UpgradeParams, Rejection> {
    const INVALID_PARAMS: Rejection = Rejection {
        status: "400 Bad Request",
        reason: "invalid_params",
    };

    let key = head
        .header("sec-websocket-key")
        .filter(|k| !k.is_empty())
        .ok_or(INVALID_PARAMS)?;
    let session_id = head
        .query_param("sessionId")
        .filter(|s| !s.is_empty())
        .ok_or(INVALID_PARAMS)?;
    let role: Role = head
        .query_param("role")
        .unwrap_or_default()
        .parse()
        .map_err(|_| INVALID_PARAMS)?;

    if head.query_param("token") != Some(token) {
        return Err(Rejection {
            status: "401 Unauthorized",
            reason: "invalid_token",
        });
    }

    Ok(UpgradeParams {
        key: key.to_string(),
        session_id: session_id.to_string(),
        role,
    })
}
