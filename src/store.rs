//! File-backed record store.
//!
//! An append-only log of newline-terminated records, held in a single file
//! that is created (truncated) at startup and removed at clean shutdown.
//! Appends are synced to stable storage before they are reported committed.
//!
//! The server handles one connection at a time, so only one append/read
//! cycle is ever outstanding; the store does not need to provide atomicity
//! across overlapping appends.

use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};

/// The on-disk record log.
pub struct RecordStore {
    file: File,
    path: PathBuf,
}

impl RecordStore {
    /// Create the store file, truncating any leftover from a previous run.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "record store created");
        Ok(Self { file, path })
    }

    /// Durably append one record, returning the committed file length.
    ///
    /// The record is flushed and synced before this returns; a reported
    /// success means the bytes are on stable storage. On error the record
    /// must be treated as not committed.
    pub async fn append(&mut self, record: &[u8]) -> std::io::Result<u64> {
        self.file.seek(SeekFrom::End(0)).await?;
        self.file.write_all(record).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;

        let committed = self.file.stream_position().await?;
        trace!(bytes = record.len(), committed, "record appended");
        Ok(committed)
    }

    /// Read the full log, from offset 0 to the current end.
    ///
    /// Does not mutate the file. `append` repositions to the end itself, so
    /// repeated calls are idempotent and never disturb the next append.
    pub async fn read_all(&mut self) -> std::io::Result<Bytes> {
        self.file.seek(SeekFrom::Start(0)).await?;
        let mut contents = Vec::new();
        self.file.read_to_end(&mut contents).await?;
        Ok(Bytes::from(contents))
    }

    /// Current length of the log in bytes.
    #[cfg(test)]
    pub async fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    /// Close the handle and delete the backing file.
    pub async fn remove(self) -> std::io::Result<()> {
        let path = self.path;
        drop(self.file);
        fs::remove_file(&path).await?;
        debug!(path = %path.display(), "record store removed");
        Ok(())
    }
}
