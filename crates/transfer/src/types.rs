use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chunkflow_protocol::FlowRequest;
use chunkflow_storage::{ChunkSource, chunk_key};

/// Metadata of one inbound chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    /// Session identifier (path-safe).
    pub identifier: String,
    /// 1-based sequence number.
    pub chunk_number: u64,
    /// Declared size of this chunk in bytes.
    pub chunk_size: u64,
    /// Declared size of the whole file in bytes.
    pub total_size: u64,
}

impl ChunkUpload {
    /// Storage name of this chunk.
    pub fn chunk_key(&self) -> String {
        chunk_key(&self.identifier, self.chunk_number)
    }
}

impl From<&FlowRequest> for ChunkUpload {
    fn from(req: &FlowRequest) -> Self {
        Self {
            identifier: req.identifier.clone(),
            chunk_number: req.chunk_number,
            chunk_size: req.current_chunk_size,
            total_size: req.total_size,
        }
    }
}

/// Completion state of a session as observed by one chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Persisted chunks do not add up to the declared total.
    Incomplete,
    /// Persisted chunks add up to the total and this snapshot holds the claim.
    Complete,
    /// Persisted chunks add up to the total but another snapshot holds the claim.
    ClaimedElsewhere,
}

/// Set of sessions that have been claimed for assembly in this process.
#[derive(Debug, Default)]
pub(crate) struct ClaimRegistry {
    claimed: Mutex<HashSet<String>>,
}

impl ClaimRegistry {
    /// Claims `session` unless someone already holds it.
    pub(crate) fn try_claim(self: &Arc<Self>, session: &str) -> Option<SessionClaim> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(session.to_string()) {
            return None;
        }
        Some(SessionClaim {
            session: session.to_string(),
            registry: Arc::clone(self),
        })
    }

    pub(crate) fn is_claimed(&self, session: &str) -> bool {
        let claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.contains(session)
    }

    fn release(&self, session: &str) {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.remove(session);
    }
}

/// Exclusive right to assemble one session. Released on drop.
#[derive(Debug)]
pub(crate) struct SessionClaim {
    session: String,
    registry: Arc<ClaimRegistry>,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry.release(&self.session);
    }
}

/// Snapshot of an upload session as of one chunk write.
///
/// A complete snapshot owns the session's claim; moving it into an
/// assembly task hands the claim over, and the claim is released as soon
/// as the task has removed the session's chunks.
pub struct UploadSession {
    id: String,
    total_size: u64,
    stored_size: u64,
    completeness: Completeness,
    source: Arc<dyn ChunkSource>,
    claim: Option<SessionClaim>,
}

impl UploadSession {
    pub(crate) fn new(
        id: String,
        total_size: u64,
        stored_size: u64,
        source: Arc<dyn ChunkSource>,
        claim: Option<SessionClaim>,
    ) -> Self {
        let completeness = match (stored_size == total_size, claim.is_some()) {
            (true, true) => Completeness::Complete,
            (true, false) => Completeness::ClaimedElsewhere,
            (false, _) => Completeness::Incomplete,
        };
        Self {
            id,
            total_size,
            stored_size,
            completeness,
            source,
            claim,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared total size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Sum of the chunk sizes persisted when the snapshot was taken.
    pub fn stored_size(&self) -> u64 {
        self.stored_size
    }

    pub fn completeness(&self) -> Completeness {
        self.completeness
    }

    /// Returns `true` if this snapshot may be submitted for assembly.
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    /// Chunk source holding this session's chunks.
    pub fn source(&self) -> &Arc<dyn ChunkSource> {
        &self.source
    }

    /// Gives up the completion claim, letting a fresh upload under the same
    /// identifier complete again. Completeness of this snapshot is unchanged.
    pub(crate) fn release_claim(&mut self) {
        self.claim = None;
    }
}

impl fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id)
            .field("total_size", &self.total_size)
            .field("stored_size", &self.stored_size)
            .field("completeness", &self.completeness)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_storage::MemoryStore;

    fn source() -> Arc<dyn ChunkSource> {
        Arc::new(MemoryStore::new("test"))
    }

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let registry = Arc::new(ClaimRegistry::default());
        let first = registry.try_claim("s1");
        assert!(first.is_some());
        assert!(registry.try_claim("s1").is_none());
        assert!(registry.try_claim("s2").is_some());

        drop(first);
        assert!(!registry.is_claimed("s1"));
        assert!(registry.try_claim("s1").is_some());
    }

    #[test]
    fn completeness_follows_sum_and_claim() {
        let registry = Arc::new(ClaimRegistry::default());

        let partial = UploadSession::new("s1".into(), 1024, 512, source(), None);
        assert_eq!(partial.completeness(), Completeness::Incomplete);
        assert!(!partial.is_complete());

        let claim = registry.try_claim("s1");
        let full = UploadSession::new("s1".into(), 1024, 1024, source(), claim);
        assert_eq!(full.completeness(), Completeness::Complete);
        assert!(full.is_complete());

        let dup = UploadSession::new("s1".into(), 1024, 1024, source(), None);
        assert_eq!(dup.completeness(), Completeness::ClaimedElsewhere);
        assert!(!dup.is_complete());

        drop(full);
        assert!(!registry.is_claimed("s1"));
    }

    #[test]
    fn chunk_upload_from_flow_request_uses_current_size() {
        let req = FlowRequest {
            chunk_number: 3,
            chunk_size: 1024,
            current_chunk_size: 700,
            total_size: 2748,
            identifier: "abc".into(),
            filename: "f.bin".into(),
            relative_path: "f.bin".into(),
            total_chunks: 3,
        };
        let upload = ChunkUpload::from(&req);
        assert_eq!(upload.chunk_size, 700);
        assert_eq!(upload.chunk_key(), "abc/3");
    }
}
