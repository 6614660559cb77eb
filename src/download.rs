//! Download orchestration
//!
//! Ties the other modules together: trackers supply addresses, one
//! [`PeerSession`](crate::peer::PeerSession) per address pulls blocks through
//! a shared [`PieceManager`](crate::piece::PieceManager), and verified pieces
//! land in a [`PieceSink`].
//!
//! ```no_run
//! use leech::config::DownloadConfig;
//! use leech::download::Download;
//! use leech::metainfo::Metainfo;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let torrent = Metainfo::from_bytes(&std::fs::read("ubuntu.torrent")?)?;
//! let download = Download::to_directory(torrent, "downloads", DownloadConfig::default()).await?;
//!
//! let mut progress = download.progress();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         let p = *progress.borrow();
//!         println!("{}/{} pieces, {} peers", p.pieces_verified, p.pieces_total, p.active_peers);
//!     }
//! });
//!
//! download.wait().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod orchestrator;
mod pool;

pub use error::{DownloadError, StallReason};

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DownloadConfig;
use crate::metainfo::Metainfo;
use crate::piece::Progress;
use crate::storage::{DiskWriter, PieceSink, TorrentStorage};
use orchestrator::Orchestrator;

/// Entry points for starting a download.
pub struct Download;

impl Download {
    /// Starts downloading `metainfo` into `sink` on the current runtime.
    pub fn start(
        metainfo: Metainfo,
        sink: Arc<dyn PieceSink>,
        config: DownloadConfig,
    ) -> DownloadHandle {
        let (orchestrator, progress) = Orchestrator::new(Arc::new(metainfo), sink, config);
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(orchestrator.run(cancel_rx));

        DownloadHandle {
            progress,
            cancel,
            task,
        }
    }

    /// Parses `.torrent` bytes, then starts as [`Download::start`].
    pub fn from_bytes(
        torrent: &[u8],
        sink: Arc<dyn PieceSink>,
        config: DownloadConfig,
    ) -> Result<DownloadHandle, DownloadError> {
        let metainfo = Metainfo::from_bytes(torrent)?;
        Ok(Self::start(metainfo, sink, config))
    }

    /// Downloads into files under `dir`, laid out as the torrent names them.
    pub async fn to_directory(
        metainfo: Metainfo,
        dir: impl Into<PathBuf>,
        config: DownloadConfig,
    ) -> Result<DownloadHandle, DownloadError> {
        let storage = TorrentStorage::new(dir, &metainfo.info)?;
        storage.preallocate().await?;
        let sink = Arc::new(DiskWriter::spawn(storage));
        Ok(Self::start(metainfo, sink, config))
    }
}

/// A running download.
///
/// Dropping the handle cancels the download.
pub struct DownloadHandle {
    progress: watch::Receiver<Progress>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<Progress, DownloadError>>,
}

impl DownloadHandle {
    /// Snapshots published whenever a piece is verified or a peer comes or
    /// goes.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Asks the download to stop. [`wait`](Self::wait) then returns
    /// [`DownloadError::Cancelled`] once every session has closed.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the download to finish and returns the final progress.
    pub async fn wait(self) -> Result<Progress, DownloadError> {
        let DownloadHandle { task, cancel, .. } = self;
        let result = task.await;
        drop(cancel);
        result.map_err(|e| DownloadError::Task(e.to_string()))?
    }
}
