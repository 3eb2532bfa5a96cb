//! In-memory object-store backend.
//!
//! Behaves like a bucket: a flat key space where `session/number` keys hold
//! chunks, and an object only becomes visible once its writer is closed.

use std::collections::BTreeMap;
use std::io::{Cursor, ErrorKind};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tracing::debug;

use crate::validation::validate_object_name;
use crate::{
    ChunkSource, ChunkStream, Destination, ObjectWriter, StorageError, StorageFuture, StoredChunk,
};

type Objects = Arc<RwLock<BTreeMap<String, Arc<[u8]>>>>;

/// Object store kept in process memory. Clones share the same bucket.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bucket: String,
    objects: Objects,
}

impl MemoryStore {
    /// Creates an empty bucket named `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Returns a copy of the object stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects.get(key).map(|data| data.to_vec())
    }

    /// Stores `data` under `key`, replacing any existing object.
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        validate_object_name(key)?;
        let data: Vec<u8> = data.into();
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.insert(key.to_string(), Arc::from(data));
        Ok(())
    }

    /// Returns all stored keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects.keys().cloned().collect()
    }
}

struct MemoryWriter {
    key: String,
    buf: Vec<u8>,
    objects: Objects,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl ObjectWriter for MemoryWriter {
    fn close(self: Box<Self>) -> StorageFuture<'static, ()> {
        Box::pin(async move {
            let MemoryWriter { key, buf, objects } = *self;
            let size = buf.len();
            objects
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone(), Arc::from(buf));
            debug!(key = %key, size, "object committed");
            Ok(())
        })
    }
}

impl ChunkSource for MemoryStore {
    fn list_chunks<'a>(&'a self, session: &'a str) -> StorageFuture<'a, Vec<StoredChunk>> {
        Box::pin(async move {
            validate_object_name(session)?;
            let prefix = format!("{session}/");
            let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
            Ok(objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .filter_map(|(key, data)| {
                    let name = &key[prefix.len()..];
                    (!name.contains('/')).then(|| StoredChunk {
                        name: name.to_string(),
                        size: data.len() as u64,
                    })
                })
                .collect())
        })
    }

    fn open_chunk<'a>(&'a self, session: &'a str, name: &'a str) -> StorageFuture<'a, ChunkStream> {
        Box::pin(async move {
            let key = format!("{session}/{name}");
            validate_object_name(&key)?;
            let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
            match objects.get(&key) {
                Some(data) => Ok(Box::new(Cursor::new(Arc::clone(data))) as ChunkStream),
                None => Err(StorageError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("no such object: {key}"),
                ))),
            }
        })
    }

    fn remove_session<'a>(&'a self, session: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            validate_object_name(session)?;
            let prefix = format!("{session}/");
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            objects.retain(|key, _| !key.starts_with(&prefix));
            Ok(())
        })
    }
}

impl Destination for MemoryStore {
    fn create<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            validate_object_name(name)?;
            Ok(Box::new(MemoryWriter {
                key: name.to_string(),
                buf: Vec::new(),
                objects: Arc::clone(&self.objects),
            }) as Box<dyn ObjectWriter>)
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            validate_object_name(name)?;
            self.objects
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
            Ok(())
        })
    }

    fn size<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<u64>> {
        Box::pin(async move {
            validate_object_name(name)?;
            let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
            Ok(objects.get(name).map(|data| data.len() as u64))
        })
    }

    fn uri(&self, name: &str) -> String {
        format!("mem://{}/{}", self.bucket, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn object_visible_only_after_close() {
        let store = MemoryStore::new("uploads");
        let mut w = store.create("movie.mp4").await.unwrap();
        w.write_all(b"frames").await.unwrap();
        assert_eq!(store.size("movie.mp4").await.unwrap(), None);

        w.close().await.unwrap();
        assert_eq!(store.size("movie.mp4").await.unwrap(), Some(6));
        assert_eq!(store.get("movie.mp4").unwrap(), b"frames");
    }

    #[tokio::test]
    async fn dropped_writer_leaves_nothing() {
        let store = MemoryStore::new("uploads");
        {
            let mut w = store.create("partial").await.unwrap();
            w.write_all(b"half").await.unwrap();
        }
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn list_chunks_scoped_to_session() {
        let store = MemoryStore::new("uploads");
        store.put("s1/1", vec![0u8; 3]).unwrap();
        store.put("s1/10", vec![0u8; 5]).unwrap();
        store.put("s10/1", vec![0u8; 7]).unwrap();
        store.put("s1x", vec![0u8; 9]).unwrap();

        let mut chunks = store.list_chunks("s1").await.unwrap();
        chunks.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            chunks,
            vec![
                StoredChunk { name: "1".into(), size: 3 },
                StoredChunk { name: "10".into(), size: 5 },
            ]
        );
    }

    #[tokio::test]
    async fn open_and_remove_session() {
        let store = MemoryStore::new("uploads");
        store.put("s1/1", b"abc".to_vec()).unwrap();
        store.put("keep", b"k".to_vec()).unwrap();

        let mut r = store.open_chunk("s1", "1").await.unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        store.remove_session("s1").await.unwrap();
        assert_eq!(store.keys(), vec!["keep".to_string()]);
        assert!(store.open_chunk("s1", "1").await.is_err());
    }

    #[test]
    fn uri_includes_bucket() {
        let store = MemoryStore::new("uploads");
        assert_eq!(store.uri("a/b.bin"), "mem://uploads/a/b.bin");
    }
}
