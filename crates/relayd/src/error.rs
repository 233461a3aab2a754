use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RelaydError {
    /// The HTTP request head was malformed or too large.
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    /// Frame decoding error on an established connection.
    #[error("frame error: {0}")]
    Frame(#[from] relay_common::frame::FrameError),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote peer before it was expected to.
    #[error("connection closed")]
    ConnectionClosed,
}
