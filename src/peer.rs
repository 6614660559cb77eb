//! Peer wire protocol (BEP-3)
//!
//! The handshake and length-prefixed messages, the framed transport that
//! carries them, and [`PeerSession`], the per-connection state machine that
//! downloads blocks for the [`PieceManager`](crate::piece::PieceManager).
//!
//! A session moves through these states:
//!
//! ```text
//! Connecting -> Handshaking -> Bitfield exchange -> Ready <-> Requesting -> Disconnected
//! ```
//!
//! Only downloading is supported: requests from the remote peer are ignored
//! and we never unchoke it.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod piece;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use peer_id::PeerId;
pub use piece::{block_count, block_length, BlockRequest};
pub use session::{PeerSession, SessionConfig, SessionExit};
pub use transport::PeerTransport;
