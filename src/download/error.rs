use std::fmt;

use thiserror::Error;

use crate::metainfo::MetainfoError;
use crate::storage::StorageError;
use crate::tracker::TrackerError;

/// Why a download stopped making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// No peer could supply a missing piece for the stall timeout.
    NoPeers,
    /// A piece kept failing its hash check.
    PersistentCorruption { piece: u32, failures: u32 },
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StallReason::NoPeers => write!(f, "no peers can supply the missing pieces"),
            StallReason::PersistentCorruption { piece, failures } => {
                write!(f, "piece {} failed verification {} times", piece, failures)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("download stalled: {0}")]
    Stalled(StallReason),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("download cancelled")]
    Cancelled,

    #[error("download task failed: {0}")]
    Task(String),
}
