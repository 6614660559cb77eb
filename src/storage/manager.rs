use super::error::StorageError;
use super::file::{file_spans, FileSpan};
use crate::metainfo::{File, Info};
use bytes::Bytes;
use dashmap::DashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;

fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

struct FileHandle {
    file: TokioMutex<tokio::fs::File>,
    writable: bool,
}

/// Open files keyed by their index in the torrent's file list.
///
/// A file opened for reading is reopened read-write on the first write.
struct FileHandleCache {
    handles: DashMap<usize, Arc<FileHandle>>,
    paths: Vec<PathBuf>,
}

impl FileHandleCache {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            handles: DashMap::new(),
            paths,
        }
    }

    async fn get_or_open_read(&self, file_index: usize) -> Result<Arc<FileHandle>, StorageError> {
        if let Some(handle) = self.handles.get(&file_index) {
            return Ok(handle.clone());
        }

        let path = &self.paths[file_index];
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|_| StorageError::FileNotFound(path.display().to_string()))?;

        let handle = Arc::new(FileHandle {
            file: TokioMutex::new(file),
            writable: false,
        });
        self.handles.insert(file_index, handle.clone());
        Ok(handle)
    }

    async fn get_or_open_write(&self, file_index: usize) -> Result<Arc<FileHandle>, StorageError> {
        if let Some(handle) = self.handles.get(&file_index) {
            if handle.writable {
                return Ok(handle.clone());
            }
        }
        self.handles.remove(&file_index);

        let path = &self.paths[file_index];
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await?;

        let handle = Arc::new(FileHandle {
            file: TokioMutex::new(file),
            writable: true,
        });
        self.handles.insert(file_index, handle.clone());
        Ok(handle)
    }

    async fn sync_all(&self) -> Result<(), StorageError> {
        let writable: Vec<Arc<FileHandle>> = self
            .handles
            .iter()
            .filter(|entry| entry.writable)
            .map(|entry| entry.value().clone())
            .collect();

        for handle in writable {
            let mut file = handle.file.lock().await;
            file.flush().await?;
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// Random-access storage for one torrent's files under a base directory.
///
/// Reads and writes address the torrent's data as one contiguous byte range;
/// ranges that cross file boundaries are split across the files they cover.
pub struct TorrentStorage {
    base_path: PathBuf,
    files: Vec<File>,
    total_length: u64,
    handle_cache: FileHandleCache,
}

impl TorrentStorage {
    /// # Errors
    ///
    /// Returns [`StorageError::PathTraversal`] if any file path is absolute or
    /// contains `..`.
    pub fn new(base_path: impl Into<PathBuf>, info: &Info) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        for file in &info.files {
            validate_file_path(&file.path)?;
        }

        let paths = info
            .files
            .iter()
            .map(|file| base_path.join(&file.path))
            .collect();

        Ok(Self {
            base_path,
            files: info.files.clone(),
            total_length: info.total_length,
            handle_cache: FileHandleCache::new(paths),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    fn spans(&self, offset: u64, length: u64) -> Result<Vec<FileSpan>, StorageError> {
        match offset.checked_add(length) {
            Some(end) if end <= self.total_length => Ok(file_spans(&self.files, offset, length)),
            _ => Err(StorageError::InvalidRange { offset, length }),
        }
    }

    /// Creates every file (and its parent directories) at its final size.
    ///
    /// Existing files are resized, not truncated to zero.
    pub async fn preallocate(&self) -> Result<(), StorageError> {
        for file in &self.files {
            let path = self.base_path.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;
            f.set_len(file.length).await?;
        }
        Ok(())
    }

    /// Writes `data` at an absolute offset into the torrent's data.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let spans = self.spans(offset, data.len() as u64)?;
        let mut data_offset = 0usize;

        for span in spans {
            let handle = self.handle_cache.get_or_open_write(span.file_index).await?;
            let mut file = handle.file.lock().await;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let chunk = &data[data_offset..data_offset + span.length as usize];
            file.write_all(chunk).await?;
            data_offset += span.length as usize;
        }
        Ok(())
    }

    pub async fn read_at(&self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let spans = self.spans(offset, length)?;
        let mut data = Vec::with_capacity(length as usize);

        for span in spans {
            let handle = self.handle_cache.get_or_open_read(span.file_index).await?;
            let mut file = handle.file.lock().await;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let start = data.len();
            data.resize(start + span.length as usize, 0);
            file.read_exact(&mut data[start..]).await?;
        }
        Ok(Bytes::from(data))
    }

    /// Flushes and syncs every file written through this storage.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.handle_cache.sync_all().await
    }
}
