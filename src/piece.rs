//! Piece scheduling, assembly and verification.
//!
//! The [`PieceManager`] is the single owner of download state. Peer sessions
//! claim blocks from it, submit the data they receive, and hand claims back
//! when they stop. A piece reaches the output sink only after its SHA-1 hash
//! matches the metainfo.
//!
//! ```no_run
//! use std::sync::Arc;
//! use leech::metainfo::Metainfo;
//! use leech::peer::Bitfield;
//! use leech::piece::{BlockOutcome, PieceManager};
//! use leech::storage::MemorySink;
//!
//! # fn example(torrent: Metainfo, peer: std::net::SocketAddr) {
//! let sink = Arc::new(MemorySink::new(torrent.info.total_length));
//! let manager = PieceManager::new(&torrent.info, sink);
//!
//! let have = Bitfield::full(torrent.info.piece_count());
//! if let Some(request) = manager.claim_block(&have) {
//!     let data = vec![0u8; request.length as usize];
//!     match manager.submit_block(peer, request.piece, request.offset, &data) {
//!         Ok(BlockOutcome::PieceVerified(index)) => println!("piece {} done", index),
//!         Ok(_) => {}
//!         Err(e) => eprintln!("{}", e),
//!     }
//! }
//! # }
//! ```

mod error;
mod manager;

pub use error::PieceError;
pub use manager::{BlockOutcome, PickStrategy, PieceManager, Progress};

#[cfg(test)]
mod tests;
