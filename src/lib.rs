//! leech - A BitTorrent download engine
//!
//! Downloads the content a `.torrent` file describes from a swarm of peers,
//! verifying every piece against its SHA-1 hash before it is written out.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`metainfo`] - BEP-3 Torrent metainfo
//! - [`tracker`] - BEP-3/15/23 HTTP and UDP tracker protocols
//! - [`peer`] - BEP-3 Peer wire protocol and per-peer download sessions
//! - [`piece`] - Block claiming, piece verification and progress
//! - [`storage`] - Writing verified pieces to files or memory
//! - [`download`] - The orchestrator tying the above together
//! - [`config`] - Download settings

pub mod bencode;
pub mod config;
pub mod constants;
pub mod download;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod tracker;

#[cfg(test)]
mod test_util;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::DownloadConfig;
pub use download::{Download, DownloadError, DownloadHandle, StallReason};
pub use metainfo::{File, Info, InfoHash, Metainfo, MetainfoError};
pub use peer::{Bitfield, BlockRequest, Handshake, Message, PeerError, PeerId, PeerSession};
pub use piece::{PickStrategy, PieceError, PieceManager, Progress};
pub use storage::{DiskWriter, MemorySink, PieceSink, StorageError, TorrentStorage};
pub use tracker::{
    AnnounceRequest, AnnounceResponse, Announcer, HttpTracker, TrackerError, TrackerEvent,
    UdpTracker,
};
