use thiserror::Error;

/// Errors that end a peer session.
///
/// None of these are fatal to a download: the session returns its claims
/// and the orchestrator moves on to another peer.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's handshake did not start with the BitTorrent protocol string.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer answered for a different torrent.
    #[error("handshake info hash mismatch")]
    HandshakeMismatch,

    /// Connect, handshake, read or request deadline passed.
    #[error("timeout")]
    Timeout,

    /// A message's length prefix disagrees with what its id requires.
    #[error("invalid message length: {0}")]
    MessageLength(String),

    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer broke the protocol, e.g. sent a block nobody asked for.
    #[error("protocol error: {0}")]
    Protocol(String),
}
