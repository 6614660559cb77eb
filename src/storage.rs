//! Output storage for verified piece data.
//!
//! Pieces may span several files, and they complete in any order. This module
//! maps absolute byte ranges of the torrent's data onto its files and provides
//! the [`PieceSink`] implementations the download writes through.
//!
//! # Components
//!
//! - [`PieceSink`] - Destination for verified pieces
//! - [`DiskWriter`] - Sink that writes to disk from a background task
//! - [`MemorySink`] - Sink that keeps pieces in memory
//! - [`TorrentStorage`] - Random-access reads and writes across the torrent's files
//!
//! # Examples
//!
//! ```no_run
//! use leech::metainfo::Metainfo;
//! use leech::storage::{DiskWriter, PieceSink, TorrentStorage};
//!
//! # async fn example(torrent: Metainfo) -> Result<(), Box<dyn std::error::Error>> {
//! let storage = TorrentStorage::new("./downloads", &torrent.info)?;
//! storage.preallocate().await?;
//!
//! let writer = DiskWriter::spawn(storage);
//! writer.write_piece(0, 0, bytes::Bytes::from(vec![0u8; 16384]))?;
//! writer.flush().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! File paths are validated before anything touches the disk. Paths
//! containing `..` or absolute paths are rejected.

mod error;
mod file;
mod manager;
mod sink;

pub use error::StorageError;
pub use file::{file_spans, FileSpan};
pub use manager::TorrentStorage;
pub use sink::{DiskWriter, MemorySink, PieceSink};
