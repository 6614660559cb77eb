use super::error::StorageError;
use super::manager::TorrentStorage;
use crate::constants::DISK_QUEUE_CAPACITY;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Destination for verified piece data.
///
/// `write_piece` is called while the piece manager holds its lock, so it
/// must not block. Pieces arrive in any order; `offset` is the absolute
/// position of the piece within the torrent's data.
pub trait PieceSink: Send + Sync {
    fn write_piece(&self, index: u32, offset: u64, data: Bytes) -> Result<(), StorageError>;

    /// Resolves once every piece handed to `write_piece` is durable.
    fn flush(&self) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// Keeps written pieces in memory, keyed by absolute offset.
#[derive(Debug, Default)]
pub struct MemorySink {
    total_length: u64,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    pieces: BTreeMap<u64, Bytes>,
    writes: usize,
}

impl MemorySink {
    pub fn new(total_length: u64) -> Self {
        Self {
            total_length,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Number of `write_piece` calls accepted so far.
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn piece_at(&self, offset: u64) -> Option<Bytes> {
        self.inner.lock().pieces.get(&offset).cloned()
    }

    /// The assembled data, with zeros wherever nothing was written.
    pub fn contents(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.total_length as usize];
        for (offset, data) in &self.inner.lock().pieces {
            let start = *offset as usize;
            out[start..start + data.len()].copy_from_slice(data);
        }
        out
    }
}

impl PieceSink for MemorySink {
    fn write_piece(&self, _index: u32, offset: u64, data: Bytes) -> Result<(), StorageError> {
        let length = data.len() as u64;
        if offset.checked_add(length).map_or(true, |end| end > self.total_length) {
            return Err(StorageError::InvalidRange { offset, length });
        }

        let mut inner = self.inner.lock();
        inner.pieces.insert(offset, data);
        inner.writes += 1;
        Ok(())
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        futures::future::ready(Ok(())).boxed()
    }
}

enum Command {
    Write { index: u32, offset: u64, data: Bytes },
    Flush(oneshot::Sender<Result<(), StorageError>>),
}

/// Writes verified pieces to disk from a background task.
///
/// `write_piece` only enqueues, so it never waits on the filesystem. When
/// the queue is full it fails with [`StorageError::WriterBusy`] instead of
/// buffering without limit. The first failed write is reported by every
/// later `write_piece` and `flush`.
pub struct DiskWriter {
    tx: mpsc::Sender<Command>,
    failure: Arc<Mutex<Option<String>>>,
}

impl DiskWriter {
    /// Spawns the writer task on the current tokio runtime.
    pub fn spawn(storage: TorrentStorage) -> Self {
        Self::with_capacity(storage, DISK_QUEUE_CAPACITY)
    }

    /// Like [`spawn`](Self::spawn), holding at most `capacity` pieces.
    pub fn with_capacity(storage: TorrentStorage, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let failure = Arc::new(Mutex::new(None));
        tokio::spawn(run_writer(storage, rx, failure.clone()));
        Self { tx, failure }
    }

    fn check_failure(&self) -> Result<(), StorageError> {
        match self.failure.lock().as_ref() {
            Some(reason) => Err(StorageError::WriterFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

impl PieceSink for DiskWriter {
    fn write_piece(&self, index: u32, offset: u64, data: Bytes) -> Result<(), StorageError> {
        self.check_failure()?;
        self.tx
            .try_send(Command::Write {
                index,
                offset,
                data,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => StorageError::WriterBusy,
                TrySendError::Closed(_) => StorageError::WriterClosed,
            })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            let (reply, done) = oneshot::channel();
            self.tx
                .send(Command::Flush(reply))
                .await
                .map_err(|_| StorageError::WriterClosed)?;
            done.await.map_err(|_| StorageError::WriterClosed)?
        }
        .boxed()
    }
}

async fn run_writer(
    storage: TorrentStorage,
    mut rx: mpsc::Receiver<Command>,
    failure: Arc<Mutex<Option<String>>>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Write {
                index,
                offset,
                data,
            } => {
                if failure.lock().is_some() {
                    continue;
                }
                match storage.write_at(offset, &data).await {
                    Ok(()) => debug!(piece = index, offset, len = data.len(), "piece written"),
                    Err(e) => {
                        error!(piece = index, offset, error = %e, "piece write failed");
                        *failure.lock() = Some(e.to_string());
                    }
                }
            }
            Command::Flush(reply) => {
                let failed = failure.lock().clone();
                let result = match failed {
                    Some(reason) => Err(StorageError::WriterFailed(reason)),
                    None => storage.flush().await,
                };
                let _ = reply.send(result);
            }
        }
    }
    debug!(path = %storage.base_path().display(), "disk writer stopped");
}
