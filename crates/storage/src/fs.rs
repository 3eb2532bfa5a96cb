//! Filesystem-rooted backend.
//!
//! Chunks live at `<root>/<session>/<number>`, objects at `<root>/<name>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::validation::validate_object_name;
use crate::{
    ChunkSource, ChunkStream, Destination, ObjectWriter, StorageError, StorageFuture, StoredChunk,
};

/// Store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_object_name(name)?;
        Ok(self.root.join(name))
    }
}

/// Writer over a file created by [`FsStore`].
struct FsWriter {
    file: tokio::fs::File,
    path: PathBuf,
}

impl AsyncWrite for FsWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl ObjectWriter for FsWriter {
    fn close(self: Box<Self>) -> StorageFuture<'static, ()> {
        Box::pin(async move {
            let FsWriter { mut file, path } = *self;
            file.flush().await?;
            file.sync_all().await?;
            debug!(path = %path.display(), "file closed");
            Ok(())
        })
    }
}

impl ChunkSource for FsStore {
    fn list_chunks<'a>(&'a self, session: &'a str) -> StorageFuture<'a, Vec<StoredChunk>> {
        Box::pin(async move {
            let dir = self.resolve(session)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut chunks = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                chunks.push(StoredChunk {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                });
            }
            Ok(chunks)
        })
    }

    fn open_chunk<'a>(&'a self, session: &'a str, name: &'a str) -> StorageFuture<'a, ChunkStream> {
        Box::pin(async move {
            let path = self.resolve(session)?.join(name);
            validate_object_name(name)?;
            let file = tokio::fs::File::open(&path).await?;
            Ok(Box::new(file) as ChunkStream)
        })
    }

    fn remove_session<'a>(&'a self, session: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.resolve(session)?;
            if dir == self.root {
                return Err(StorageError::RefusedRoot(dir.display().to_string()));
            }
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!(session, "session directory removed");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

impl Destination for FsStore {
    fn create<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            let path = self.resolve(name)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::File::create(&path).await?;
            Ok(Box::new(FsWriter { file, path }) as Box<dyn ObjectWriter>)
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.resolve(name)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn size<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<u64>> {
        Box::pin(async move {
            let path = self.resolve(name)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
                Ok(_) => Ok(None),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn uri(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().into_owned()
    }
}
