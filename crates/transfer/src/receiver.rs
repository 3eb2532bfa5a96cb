//! Chunk receiver: persists one chunk and recomputes session completeness.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use chunkflow_storage::{ChunkSource, Destination};

use crate::types::ClaimRegistry;
use crate::validation::{validate_chunk_upload, validate_session_id};
use crate::{ChunkUpload, ReceiveError, UploadSession};

/// Receives chunks into a store that is both a chunk source and a destination.
///
/// Completeness is recomputed from the store on every write, so chunks may
/// arrive in any order and from different receivers sharing the same store.
/// Within one process, the receiver also guarantees that only one snapshot
/// per session reports [`is_complete`](UploadSession::is_complete).
pub struct ChunkReceiver<S> {
    store: Arc<S>,
    claims: Arc<ClaimRegistry>,
}

impl<S> Clone for ChunkReceiver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            claims: Arc::clone(&self.claims),
        }
    }
}

impl<S> ChunkReceiver<S>
where
    S: ChunkSource + Destination + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            claims: Arc::new(ClaimRegistry::default()),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns `true` if `session` is currently claimed for assembly.
    pub fn is_claimed(&self, session: &str) -> bool {
        self.claims.is_claimed(session)
    }

    /// Returns `true` if the chunk already exists with exactly its declared size.
    ///
    /// Lets clients skip re-sending chunks without reading the stream.
    pub async fn is_chunk_present(&self, upload: &ChunkUpload) -> bool {
        if validate_chunk_upload(upload).is_err() {
            return false;
        }
        match self.store.size(&upload.chunk_key()).await {
            Ok(Some(size)) => size == upload.chunk_size,
            Ok(None) => false,
            Err(e) => {
                warn!(chunk = %upload.chunk_key(), error = %e, "failed to stat chunk");
                false
            }
        }
    }

    /// Persists one chunk read from `source` and returns the session snapshot.
    ///
    /// Exactly `upload.chunk_size` bytes must arrive; anything else removes the
    /// chunk and fails. Does not submit the session for assembly.
    pub async fn receive_chunk<R>(
        &self,
        upload: &ChunkUpload,
        source: R,
    ) -> Result<UploadSession, ReceiveError>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_chunk_upload(upload)?;
        let key = upload.chunk_key();

        let mut writer = self
            .store
            .create(&key)
            .await
            .map_err(ReceiveError::CreateFailed)?;

        // One byte past the declared size is enough to detect an oversized body.
        let mut limited = source.take(upload.chunk_size.saturating_add(1));
        let copied = match tokio::io::copy(&mut limited, &mut writer).await {
            Ok(n) => n,
            Err(e) => {
                drop(writer);
                self.discard(&key).await;
                return Err(ReceiveError::CopyFailed(e));
            }
        };

        if copied != upload.chunk_size {
            drop(writer);
            self.discard(&key).await;
            return Err(ReceiveError::SizeMismatch {
                expected: upload.chunk_size,
                actual: copied,
            });
        }

        if let Err(e) = writer.close().await {
            self.discard(&key).await;
            return Err(ReceiveError::CloseFailed(e));
        }

        debug!(chunk = %key, size = copied, "chunk stored");

        self.snapshot(&upload.identifier, upload.total_size).await
    }

    /// Builds a snapshot of `session` from what is currently stored, without
    /// writing anything.
    ///
    /// Used after a restart to pick up sessions whose last chunk landed before
    /// the process went down.
    pub async fn session(
        &self,
        session: &str,
        total_size: u64,
    ) -> Result<UploadSession, ReceiveError> {
        validate_session_id(session)?;
        if total_size == 0 {
            return Err(ReceiveError::InvalidRequest("empty file".into()));
        }
        self.snapshot(session, total_size).await
    }

    async fn snapshot(
        &self,
        session: &str,
        total_size: u64,
    ) -> Result<UploadSession, ReceiveError> {
        let chunks = self
            .store
            .list_chunks(session)
            .await
            .map_err(ReceiveError::ListFailed)?;
        let stored: u64 = chunks.iter().map(|c| c.size).sum();

        let claim = if stored == total_size {
            let claim = self.claims.try_claim(session);
            match &claim {
                Some(_) => info!(session, total_size, chunks = chunks.len(), "session complete"),
                None => debug!(session, "session complete but already claimed"),
            }
            claim
        } else {
            None
        };

        let source: Arc<dyn ChunkSource> = self.store.clone();
        Ok(UploadSession::new(
            session.to_string(),
            total_size,
            stored,
            source,
            claim,
        ))
    }

    /// Best-effort removal of a tainted chunk.
    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(chunk = %key, error = %e, "failed to remove tainted chunk");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Completeness;
    use chunkflow_storage::{FsStore, MemoryStore};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    fn upload(
        identifier: &str,
        chunk_number: u64,
        chunk_size: u64,
        total_size: u64,
    ) -> ChunkUpload {
        ChunkUpload {
            identifier: identifier.into(),
            chunk_number,
            chunk_size,
            total_size,
        }
    }

    /// Yields `ok_bytes` bytes, then fails.
    struct FailingReader {
        ok_bytes: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.ok_bytes == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "client went away",
                )));
            }
            let n = self.ok_bytes.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.ok_bytes -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn two_chunk_session_completes_on_second_chunk() {
        let dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(Arc::new(FsStore::new(dir.path())));

        let data = vec![1u8; 512];
        let first = receiver
            .receive_chunk(&upload("abcdefg", 1, 512, 1024), data.as_slice())
            .await
            .unwrap();
        assert_eq!(first.id(), "abcdefg");
        assert!(!first.is_complete());
        assert_eq!(first.stored_size(), 512);

        let second = receiver
            .receive_chunk(&upload("abcdefg", 2, 512, 1024), data.as_slice())
            .await
            .unwrap();
        assert!(second.is_complete());
        assert_eq!(second.stored_size(), 1024);
        assert!(dir.path().join("abcdefg/1").exists());
        assert!(dir.path().join("abcdefg/2").exists());
    }

    #[tokio::test]
    async fn out_of_order_arrival_completes_only_after_last_chunk() {
        let receiver = ChunkReceiver::new(Arc::new(MemoryStore::new("uploads")));

        let s = receiver
            .receive_chunk(&upload("s1", 2, 100, 250), [2u8; 100].as_slice())
            .await
            .unwrap();
        assert!(!s.is_complete());

        let s = receiver
            .receive_chunk(&upload("s1", 3, 50, 250), [3u8; 50].as_slice())
            .await
            .unwrap();
        assert!(!s.is_complete());

        let s = receiver
            .receive_chunk(&upload("s1", 1, 100, 250), [1u8; 100].as_slice())
            .await
            .unwrap();
        assert!(s.is_complete());
    }

    #[tokio::test]
    async fn short_body_fails_and_leaves_no_chunk() {
        let dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(Arc::new(FsStore::new(dir.path())));

        let err = receiver
            .receive_chunk(&upload("s1", 1, 512, 1024), [0u8; 100].as_slice())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::SizeMismatch { expected: 512, actual: 100 }
        ));
        assert!(!dir.path().join("s1/1").exists());
    }

    #[tokio::test]
    async fn oversized_body_fails_and_leaves_no_chunk() {
        let store = Arc::new(MemoryStore::new("uploads"));
        let receiver = ChunkReceiver::new(Arc::clone(&store));

        let err = receiver
            .receive_chunk(&upload("s1", 1, 10, 1024), [0u8; 64].as_slice())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::SizeMismatch { expected: 10, actual: 11 }
        ));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn maximum_declared_size_is_a_size_mismatch() {
        let store = Arc::new(MemoryStore::new("uploads"));
        let receiver = ChunkReceiver::new(Arc::clone(&store));

        let err = receiver
            .receive_chunk(&upload("huge", 1, u64::MAX, u64::MAX), b"abc".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::SizeMismatch { expected: u64::MAX, actual: 3 }
        ));
        assert!(store.keys().is_empty());
        assert!(!receiver.is_claimed("huge"));
    }

    #[tokio::test]
    async fn copy_failure_removes_partial_chunk() {
        let dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(Arc::new(FsStore::new(dir.path())));

        let err = receiver
            .receive_chunk(&upload("s1", 1, 512, 1024), FailingReader { ok_bytes: 200 })
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::CopyFailed(_)));
        assert!(!dir.path().join("s1/1").exists());
    }

    #[tokio::test]
    async fn invalid_identifier_rejected_before_storage() {
        let dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(Arc::new(FsStore::new(dir.path().join("root"))));

        let err = receiver
            .receive_chunk(&upload("../escape", 1, 4, 4), b"evil".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::InvalidRequest(_)));
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn resent_chunk_overwrites_previous() {
        let store = Arc::new(MemoryStore::new("uploads"));
        let receiver = ChunkReceiver::new(Arc::clone(&store));

        receiver
            .receive_chunk(&upload("s1", 1, 3, 10), b"abc".as_slice())
            .await
            .unwrap();
        let s = receiver
            .receive_chunk(&upload("s1", 1, 5, 10), b"defgh".as_slice())
            .await
            .unwrap();
        assert_eq!(s.stored_size(), 5);
        assert_eq!(store.get("s1/1").unwrap(), b"defgh");
    }

    #[tokio::test]
    async fn chunk_presence_requires_exact_size() {
        let receiver = ChunkReceiver::new(Arc::new(MemoryStore::new("uploads")));
        let chunk = upload("s1", 1, 4, 8);
        assert!(!receiver.is_chunk_present(&chunk).await);

        receiver.receive_chunk(&chunk, b"abcd".as_slice()).await.unwrap();
        assert!(receiver.is_chunk_present(&chunk).await);
        assert!(!receiver.is_chunk_present(&upload("s1", 1, 3, 8)).await);
        assert!(!receiver.is_chunk_present(&upload("s1", 2, 4, 8)).await);
    }

    #[tokio::test]
    async fn duplicate_completion_is_claimed_once() {
        let receiver = ChunkReceiver::new(Arc::new(MemoryStore::new("uploads")));

        let complete = receiver
            .receive_chunk(&upload("s1", 1, 4, 4), b"abcd".as_slice())
            .await
            .unwrap();
        assert!(complete.is_complete());
        assert!(receiver.is_claimed("s1"));

        // The same last chunk re-sent while the first snapshot is alive.
        let again = receiver
            .receive_chunk(&upload("s1", 1, 4, 4), b"abcd".as_slice())
            .await
            .unwrap();
        assert_eq!(again.completeness(), Completeness::ClaimedElsewhere);
        assert!(!again.is_complete());

        drop(complete);
        assert!(!receiver.is_claimed("s1"));
    }

    #[tokio::test]
    async fn concurrent_last_chunks_yield_one_complete_snapshot() {
        let receiver = ChunkReceiver::new(Arc::new(MemoryStore::new("uploads")));

        let mut handles = Vec::new();
        for n in 1..=8u64 {
            let r = receiver.clone();
            handles.push(tokio::spawn(async move {
                r.receive_chunk(&upload("race", n, 16, 128), [n as u8; 16].as_slice())
                    .await
                    .unwrap()
            }));
        }

        let mut sessions = Vec::new();
        for h in handles {
            sessions.push(h.await.unwrap());
        }
        let complete = sessions.iter().filter(|s| s.is_complete()).count();
        assert_eq!(complete, 1);
    }

    #[tokio::test]
    async fn session_snapshot_from_existing_chunks() {
        let store = Arc::new(MemoryStore::new("uploads"));
        store.put("s1/1", vec![0u8; 6]).unwrap();
        store.put("s1/2", vec![0u8; 4]).unwrap();
        let receiver = ChunkReceiver::new(Arc::clone(&store));

        assert!(!receiver.session("s1", 20).await.unwrap().is_complete());
        assert!(receiver.session("s1", 10).await.unwrap().is_complete());
        assert!(receiver.session("s1", 0).await.is_err());
    }
}
