use crate::error::RelaydError;
use relay_common::frame::{self, FrameError, OP_CLOSE, OP_PING, OP_PONG, OP_TEXT};
use relay_common::types::{close_code, close_reason};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Queue depth for frames waiting to be written to a peer. When the queue
/// is full, forwarded messages are dropped (fire-and-forget delivery).
pub const OUTBOUND_QUEUE: usize = 256;

/// Commands delivered to a connection task, either by its session peer
/// (forwarded text) or by the dispatcher (displacement close).
#[derive(Debug)]
pub enum Outbound {
    /// Forward a text message to this connection's client.
    Text(String),
    /// Close the connection with the given status code and reason.
    Close {
        /// WebSocket close status code.
        code: u16,
        /// Close reason carried in the close frame payload.
        reason: &'static str,
    },
}

/// Write side of one upgraded connection.
///
/// Tracks a single monotonic `closed` flag: once set, every send is a
/// no-op and [`Connection::close`] never writes a second close frame.
#[derive(Debug)]
pub struct Connection<W> {
    writer: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> Connection<W> {
    /// Wraps the write half of a stream that has completed the upgrade.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    /// Whether this connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes a text frame. No-op once the connection is closed.
    pub async fn send_text(&mut self, text: &str) -> Result<(), RelaydError> {
        if self.closed {
            return Ok(());
        }
        self.writer
            .write_all(&frame::encode(OP_TEXT, text.as_bytes()))
            .await?;
        Ok(())
    }

    /// Writes a pong frame echoing `payload`. No-op once closed.
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<(), RelaydError> {
        if self.closed {
            return Ok(());
        }
        self.writer
            .write_all(&frame::encode(OP_PONG, payload))
            .await?;
        Ok(())
    }

    /// Writes a close frame and ends the stream. Idempotent; the close
    /// frame is best-effort and a write failure here is swallowed.
    pub async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self
            .writer
            .write_all(&frame::encode_close(code, reason))
            .await;
        let _ = self.writer.shutdown().await;
    }

    /// Ends the stream without writing a close frame. Used when the peer
    /// sent a close frame: this relay does not echo one back.
    pub async fn finish(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.writer.shutdown().await;
    }
}

enum LoopFlow {
    Continue,
    Stop,
}

/// Drive one connection until it closes.
///
/// Selects between inbound socket reads and [`Outbound`] commands from
/// the delivery channel. Inbound bytes are appended to a reassembly
/// buffer and decoded frame by frame; `initial` carries any bytes the
/// client sent behind its upgrade request. Each decoded text payload is
/// handed to `on_text`, the single message callback wired at
/// construction.
///
/// # Errors
///
/// Returns an I/O error when the transport fails mid-connection. Callers
/// treat that identically to a graceful close.
pub async fn run_message_loop<R, W, F>(
    reader: &mut R,
    conn: &mut Connection<W>,
    deliver_rx: &mut mpsc::Receiver<Outbound>,
    initial: Vec<u8>,
    mut on_text: F,
) -> Result<(), RelaydError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(String),
{
    let mut inbox = initial;
    if !inbox.is_empty() {
        if let LoopFlow::Stop = drain_frames(conn, &mut inbox, &mut on_text).await? {
            return Ok(());
        }
    }

    let mut chunk = [0u8; 4096];
    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        inbox.extend_from_slice(&chunk[..n]);
                        if let LoopFlow::Stop = drain_frames(conn, &mut inbox, &mut on_text).await? {
                            return Ok(());
                        }
                    }
                    Err(e) => return Err(RelaydError::Io(e)),
                }
            }
            cmd = deliver_rx.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => conn.send_text(&text).await?,
                    Some(Outbound::Close { code, reason }) => {
                        conn.close(code, reason).await;
                        return Ok(());
                    }
                    // Dispatcher dropped the sender; shut down normally.
                    None => {
                        conn.close(close_code::NORMAL, "").await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Decodes every complete frame currently in `inbox`. Returns
/// [`LoopFlow::Stop`] once the connection is finished, either because a
/// close frame arrived or a protocol violation forced a close.
async fn drain_frames<W, F>(
    conn: &mut Connection<W>,
    inbox: &mut Vec<u8>,
    on_text: &mut F,
) -> Result<LoopFlow, RelaydError>
where
    W: AsyncWrite + Unpin,
    F: FnMut(String),
{
    loop {
        let (frame, consumed) = match frame::decode(inbox) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(LoopFlow::Continue),
            Err(FrameError::PayloadTooLarge { declared }) => {
                tracing::debug!(declared, "oversized frame, closing");
                conn.close(close_code::MESSAGE_TOO_BIG, close_reason::FRAME_TOO_LARGE)
                    .await;
                return Ok(LoopFlow::Stop);
            }
        };
        inbox.drain(..consumed);

        if !frame.fin {
            tracing::debug!("fragmented frame, closing");
            conn.close(close_code::UNSUPPORTED_DATA, close_reason::FRAGMENTED)
                .await;
            return Ok(LoopFlow::Stop);
        }

        match frame.opcode {
            OP_TEXT => on_text(String::from_utf8_lossy(&frame.payload).into_owned()),
            OP_CLOSE => {
                conn.finish().await;
                return Ok(LoopFlow::Stop);
            }
            OP_PING => conn.send_pong(&frame.payload).await?,
            // Pongs and unrecognized opcodes are dropped.
            _ => {}
        }
    }
}
