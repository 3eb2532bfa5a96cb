use chunkflow_protocol::check_identifier;

use crate::{ChunkUpload, ReceiveError};

/// Validates that a session identifier is non-empty and safe to use as a
/// storage path segment.
pub fn validate_session_id(identifier: &str) -> Result<(), ReceiveError> {
    if identifier.is_empty() {
        return Err(ReceiveError::InvalidRequest("empty session identifier".into()));
    }
    check_identifier(identifier)
        .map_err(|e| ReceiveError::InvalidRequest(format!("{e}: {identifier:?}")))
}

/// Validates chunk metadata before anything touches storage.
///
/// Rejects:
/// - Unsafe or empty session identifiers
/// - Chunk number 0 (sequence numbers start at 1)
/// - Zero-length chunks
/// - Chunks declared larger than the whole file
pub(crate) fn validate_chunk_upload(upload: &ChunkUpload) -> Result<(), ReceiveError> {
    validate_session_id(&upload.identifier)?;

    if upload.chunk_number == 0 {
        return Err(ReceiveError::InvalidRequest(
            "chunk numbers start at 1".into(),
        ));
    }
    if upload.chunk_size == 0 {
        return Err(ReceiveError::InvalidRequest("empty chunk".into()));
    }
    if upload.chunk_size > upload.total_size {
        return Err(ReceiveError::InvalidRequest(format!(
            "chunk of {} bytes exceeds total size {}",
            upload.chunk_size, upload.total_size
        )));
    }

    Ok(())
}
