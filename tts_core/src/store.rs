use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Instant,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    key::CacheKey,
    stream::{self, AudioStream},
};

/// A published cache entry opened for streaming.
pub struct CachedAudio {
    pub len: u64,
    pub stream: AudioStream,
}

/// Durable, content-addressed storage for synthesized audio.
///
/// Entries are immutable once published. Implementations must make `publish`
/// atomic with respect to `exists` and `open_for_read`: a reader sees either
/// nothing or the complete blob.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Open a published entry. Fails with `StoreError::NotFound` if absent.
    async fn open_for_read(&self, key: &CacheKey) -> Result<CachedAudio, StoreError>;

    /// Consume `producer` and publish its bytes under `key`. Returns the
    /// number of bytes written.
    async fn publish(&self, key: &CacheKey, producer: AudioStream) -> Result<u64, StoreError>;
}

/// Filesystem-backed store: one file per entry under `root`, named
/// `<digest>.<ext>`. Each publish writes its own dot-prefixed temporary file
/// in `root` and moves it into place without replacing an existing entry.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    async fn write_temp(mut file: fs::File, mut producer: AudioStream) -> io::Result<u64> {
        let mut written = 0u64;
        while let Some(chunk) = producer.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let path = self.entry_path(key);
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn open_for_read(&self, key: &CacheKey) -> Result<CachedAudio, StoreError> {
        let path = self.entry_path(key);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| StoreError::io(&path, e))?
            .len();

        Ok(CachedAudio {
            len,
            stream: stream::read_chunks(file),
        })
    }

    async fn publish(&self, key: &CacheKey, producer: AudioStream) -> Result<u64, StoreError> {
        let started_at = Instant::now();
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        // Unique per attempt. `temp_path` deletes the file when dropped, so a
        // failed or cancelled publish leaves nothing behind.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(&format!(".{}.", key.file_name()))
            .suffix(".part")
            .tempfile_in(&self.root)
            .map_err(|e| StoreError::io(&self.root, e))?
            .into_parts();

        let written = Self::write_temp(fs::File::from_std(file), producer)
            .await
            .map_err(|e| StoreError::io(temp_path.to_path_buf(), e))?;

        let target = self.entry_path(key);
        let persisted = {
            let target = target.clone();
            tokio::task::spawn_blocking(move || temp_path.persist_noclobber(target))
                .await
                .map_err(|e| StoreError::io(&self.root, io::Error::other(e)))?
        };

        match persisted {
            Ok(()) => debug!(
                op = "cache::publish",
                result = "published",
                key = %key,
                bytes = written,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Cache entry published"
            ),
            // Entries are immutable: a concurrent writer got there first.
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => debug!(
                op = "cache::publish",
                result = "already_published",
                key = %key,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Cache entry already published; discarding duplicate"
            ),
            Err(err) => {
                warn!(
                    op = "cache::publish",
                    result = "error",
                    key = %key,
                    error = %err.error,
                    "Failed to move cache entry into place"
                );
                return Err(StoreError::io(target, err.error));
            }
        }
        Ok(written)
    }
}
