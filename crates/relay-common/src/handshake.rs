//! WebSocket upgrade handshake and HTTP response rendering.
//!
//! The accept credential is the base64-encoded SHA-1 digest of the
//! client-supplied key concatenated with the fixed protocol GUID
//! (RFC 6455 §4.2.2). Everything here is pure string/byte work; writing
//! the rendered responses to a socket is the server's job.

use base64::prelude::*;
use sha1::{Digest, Sha1};

/// Fixed GUID every WebSocket handshake concatenates with the client key.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn compute_accept(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Renders the `101 Switching Protocols` upgrade response.
#[must_use]
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

/// Renders a plain HTTP response that terminates the connection.
///
/// `status` is the full status line tail, e.g. `"400 Bad Request"`.
#[must_use]
pub fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Connection: close\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// Renders a plain-text error response, e.g. for rejected upgrades.
#[must_use]
pub fn http_error(status: &str, reason: &str) -> String {
    http_response(status, "text/plain; charset=utf-8", reason)
}
