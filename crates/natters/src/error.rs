use crate::handshake::HandshakeError;
use thiserror::Error;

/// Errors that end a connection or stop the server.
#[derive(Error, Debug)]
pub enum NattersError {
    /// The login handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// No login frame arrived within the login timeout.
    #[error("login timed out")]
    LoginTimeout,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
}
