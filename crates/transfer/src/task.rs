//! Assembly task: one complete session waiting to be merged.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use chunkflow_storage::Destination;

use crate::{AssemblyError, UploadSession, merge};

/// Callback invoked once a task has been resolved.
pub type CompletionCallback<T> = Box<dyn FnOnce(UploadOutcome<T>) + Send + 'static>;

/// What a completion callback receives.
#[derive(Debug)]
pub struct UploadOutcome<T = ()> {
    /// Identifier of the assembled session.
    pub session_id: String,
    /// URI of the assembled object, or why assembly failed.
    pub result: Result<String, AssemblyError>,
    /// Opaque data supplied when the task was created.
    pub user_data: T,
}

impl<T> UploadOutcome<T> {
    /// URI of the assembled object, if assembly succeeded.
    pub fn uri(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }

    /// The assembly error, if assembly failed.
    pub fn error(&self) -> Option<&AssemblyError> {
        self.result.as_ref().err()
    }
}

/// A complete session plus everything needed to merge it and report back.
pub struct AssemblyTask<T = ()> {
    session: UploadSession,
    destination: Arc<dyn Destination>,
    name: String,
    callback: Option<CompletionCallback<T>>,
    user_data: T,
    result: Option<Result<String, AssemblyError>>,
}

impl<T> AssemblyTask<T> {
    /// Creates a task merging `session` into `destination`.
    ///
    /// The destination object is named after the session identifier unless
    /// [`with_name`](Self::with_name) says otherwise.
    pub fn new(session: UploadSession, destination: Arc<dyn Destination>, user_data: T) -> Self {
        let name = session.id().to_string();
        Self {
            session,
            destination,
            name,
            callback: None,
            user_data,
            result: None,
        }
    }

    /// Sets the destination object name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the completion callback.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(UploadOutcome<T>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Destination object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URI or error, once the task has run.
    pub fn result(&self) -> Option<&Result<String, AssemblyError>> {
        self.result.as_ref()
    }

    /// Merges the session, then removes its chunks whatever the outcome.
    ///
    /// The session's claim is released once the chunks are gone, before the
    /// callback runs.
    pub(crate) async fn run(&mut self) {
        let session = self.session.id();
        let source = Arc::clone(self.session.source());

        let result = merge::assemble(
            source.as_ref(),
            session,
            self.destination.as_ref(),
            &self.name,
        )
        .await;

        match &result {
            Ok(uri) => info!(session, uri = %uri, "session assembled"),
            Err(e) => warn!(session, error = %e, "session assembly failed"),
        }

        // A failed session is discarded rather than retried; the client
        // starts a fresh one.
        if let Err(e) = source.remove_session(session).await {
            warn!(session, error = %e, "failed to remove session chunks");
        }
        self.session.release_claim();

        self.result = Some(result);
    }

    /// Invokes the callback with the recorded outcome. Consumes the task.
    pub(crate) fn notify(self) {
        let Self {
            session,
            callback,
            user_data,
            result,
            ..
        } = self;

        let Some(callback) = callback else {
            return;
        };
        let Some(result) = result else {
            warn!(session = session.id(), "task notified before it ran");
            return;
        };
        callback(UploadOutcome {
            session_id: session.id().to_string(),
            result,
            user_data,
        });
    }
}

impl<T> fmt::Debug for AssemblyTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyTask")
            .field("session", &self.session)
            .field("name", &self.name)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkReceiver, ChunkUpload};
    use chunkflow_storage::MemoryStore;
    use std::sync::Mutex;

    fn upload(identifier: &str, chunk_number: u64, size: u64, total: u64) -> ChunkUpload {
        ChunkUpload {
            identifier: identifier.into(),
            chunk_number,
            chunk_size: size,
            total_size: total,
        }
    }

    #[tokio::test]
    async fn claim_released_before_notification() {
        let incoming = Arc::new(MemoryStore::new("incoming"));
        let receiver = ChunkReceiver::new(Arc::clone(&incoming));
        let complete = Arc::new(MemoryStore::new("complete"));

        let session = receiver
            .receive_chunk(&upload("flowid", 1, 4, 4), b"abcd".as_slice())
            .await
            .unwrap();
        assert!(session.is_complete());

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let destination: Arc<dyn Destination> = complete.clone();
        let mut task = AssemblyTask::new(session, destination, ())
            .on_complete(move |o| sink.lock().unwrap().push(o.result.is_ok()));

        task.run().await;
        assert!(task.result().unwrap().is_ok());
        assert!(incoming.keys().is_empty());
        assert!(!receiver.is_claimed("flowid"));

        // The client retries under the same identifier before the first
        // task has been notified.
        let retry = receiver
            .receive_chunk(&upload("flowid", 1, 4, 4), b"wxyz".as_slice())
            .await
            .unwrap();
        assert!(retry.is_complete());
        assert!(receiver.is_claimed("flowid"));

        task.notify();
        assert_eq!(*outcomes.lock().unwrap(), vec![true]);
        // Notifying the old task leaves the retry's claim alone.
        assert!(receiver.is_claimed("flowid"));
        drop(retry);
        assert!(!receiver.is_claimed("flowid"));
    }

    #[tokio::test]
    async fn failed_merge_also_releases_claim() {
        let incoming = Arc::new(MemoryStore::new("incoming"));
        let receiver = ChunkReceiver::new(Arc::clone(&incoming));

        let session = receiver
            .receive_chunk(&upload("s1", 1, 4, 4), b"abcd".as_slice())
            .await
            .unwrap();
        let destination: Arc<dyn Destination> = Arc::new(MemoryStore::new("complete"));
        let mut task = AssemblyTask::new(session, destination, ()).with_name("../escape");

        task.run().await;
        assert!(matches!(task.result(), Some(Err(AssemblyError::CreateFailed(_)))));
        assert!(incoming.keys().is_empty());
        assert!(!receiver.is_claimed("s1"));
    }
}
