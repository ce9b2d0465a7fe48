use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// characters that cannot appear raw in a URL path segment
const SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'?').add(b'#').add(b'"');

/// Progress information emitted while an object is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    /// Expected size, 0 when unknown
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }
}

pub type ByteStream<'a> = BoxStream<'a, StorageResult<Bytes>>;

/// Media storage addressed by slash-separated object paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` to `path`, replacing any existing object. Returns the
    /// number of bytes stored.
    async fn put<'a>(
        &self,
        path: &str,
        body: ByteStream<'a>,
        total_bytes: u64,
        progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> StorageResult<u64>;

    async fn get(&self, path: &str) -> StorageResult<Option<Bytes>>;

    /// Remove every object under `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;

    /// Public URL of an object
    fn url_for(&self, path: &str) -> String;
}

/// Object store backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() || trimmed.contains('\\') {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        let mut resolved = self.root.clone();
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidPath(path.to_string()));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

async fn count_files(dir: &Path) -> StorageResult<usize> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put<'a>(
        &self,
        path: &str,
        mut body: ByteStream<'a>,
        total_bytes: u64,
        progress: &(dyn Fn(UploadProgress) + Send + Sync),
    ) -> StorageResult<u64> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = target.with_extension(format!("{}.part", uuid::Uuid::now_v7()));
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut transferred = 0u64;
        progress(UploadProgress::new(0, total_bytes));

        let written: StorageResult<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                transferred += chunk.len() as u64;
                progress(UploadProgress::new(transferred, total_bytes));
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &target).await?;
        tracing::debug!("Stored {} ({} bytes)", path, transferred);
        Ok(transferred)
    }

    async fn get(&self, path: &str) -> StorageResult<Option<Bytes>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let target = self.resolve(prefix)?;
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            let removed = count_files(&target).await?;
            tokio::fs::remove_dir_all(&target).await?;
            Ok(removed)
        } else {
            tokio::fs::remove_file(&target).await?;
            Ok(1)
        }
    }

    fn url_for(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.public_base.trim_end_matches('/'), encoded.join("/"))
    }
}
