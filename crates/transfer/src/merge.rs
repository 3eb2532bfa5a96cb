//! Merging a session's chunks into one destination object.

use tracing::{trace, warn};

use chunkflow_storage::{ChunkSource, Destination, ObjectWriter, StoredChunk};

use crate::AssemblyError;

/// Parses a chunk name into its sequence number.
///
/// Only canonical positive decimals are accepted: `"1"`, `"10"`, but not
/// `"0"`, `"01"`, `"+1"` or `"part-1"`.
fn parse_chunk_number(name: &str) -> Option<u64> {
    let number = name.parse::<u64>().ok()?;
    (number >= 1 && number.to_string() == name).then_some(number)
}

/// Lists the chunks of `session` sorted by ascending sequence number.
pub(crate) async fn ordered_chunks(
    source: &dyn ChunkSource,
    session: &str,
) -> Result<Vec<(u64, StoredChunk)>, AssemblyError> {
    let chunks = source
        .list_chunks(session)
        .await
        .map_err(AssemblyError::ListFailed)?;

    let mut numbered = chunks
        .into_iter()
        .map(|chunk| match parse_chunk_number(&chunk.name) {
            Some(number) => Ok((number, chunk)),
            None => Err(AssemblyError::InvalidChunkName(chunk.name)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    numbered.sort_unstable_by_key(|(number, _)| *number);
    Ok(numbered)
}

/// Streams every chunk of `session`, in order, into `writer`.
///
/// Returns the number of bytes written.
async fn copy_chunks(
    source: &dyn ChunkSource,
    session: &str,
    writer: &mut Box<dyn ObjectWriter>,
) -> Result<u64, AssemblyError> {
    let chunks = ordered_chunks(source, session).await?;
    if chunks.is_empty() {
        return Err(AssemblyError::NoChunks);
    }

    let mut total = 0u64;
    for (number, chunk) in chunks {
        let mut reader = source
            .open_chunk(session, &chunk.name)
            .await
            .map_err(|source| AssemblyError::OpenFailed { chunk: number, source })?;

        let copied = tokio::io::copy(&mut reader, writer)
            .await
            .map_err(|source| AssemblyError::CopyFailed { chunk: number, source })?;

        // Declared chunk sizes are always positive, so zero bytes means the
        // chunk was truncated after it was counted.
        if copied == 0 {
            return Err(AssemblyError::EmptyChunk { chunk: number });
        }

        trace!(session, chunk = number, bytes = copied, "chunk merged");
        total += copied;
    }

    Ok(total)
}

/// Merges `session` into `name` on `destination` and returns its URI.
///
/// On any failure the partially written object is deleted. The session's
/// chunks are left alone; removing them is the caller's job.
pub(crate) async fn assemble(
    source: &dyn ChunkSource,
    session: &str,
    destination: &dyn Destination,
    name: &str,
) -> Result<String, AssemblyError> {
    let mut writer = destination
        .create(name)
        .await
        .map_err(AssemblyError::CreateFailed)?;

    let written = match copy_chunks(source, session, &mut writer).await {
        Ok(n) => n,
        Err(e) => {
            drop(writer);
            discard(destination, name).await;
            return Err(e);
        }
    };

    if let Err(e) = writer.close().await {
        discard(destination, name).await;
        return Err(AssemblyError::CloseFailed(e));
    }

    trace!(session, name, bytes = written, "destination closed");
    Ok(destination.uri(name))
}

/// Best-effort removal of a partial destination object.
async fn discard(destination: &dyn Destination, name: &str) {
    if let Err(e) = destination.delete(name).await {
        warn!(name, error = %e, "failed to delete partial destination object");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_storage::MemoryStore;

    #[test]
    fn chunk_names_parse_strictly() {
        assert_eq!(parse_chunk_number("1"), Some(1));
        assert_eq!(parse_chunk_number("10"), Some(10));
        assert_eq!(parse_chunk_number("0"), None);
        assert_eq!(parse_chunk_number("01"), None);
        assert_eq!(parse_chunk_number("+1"), None);
        assert_eq!(parse_chunk_number("part-1"), None);
        assert_eq!(parse_chunk_number(""), None);
    }

    #[tokio::test]
    async fn chunks_sorted_numerically_not_lexically() {
        let store = MemoryStore::new("uploads");
        store.put("s1/10", b"c".to_vec()).unwrap();
        store.put("s1/2", b"b".to_vec()).unwrap();
        store.put("s1/1", b"a".to_vec()).unwrap();

        let order: Vec<u64> = ordered_chunks(&store, "s1")
            .await
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(order, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn assemble_concatenates_in_sequence_order() {
        let chunks = MemoryStore::new("incoming");
        chunks.put("s1/10", b"ten".to_vec()).unwrap();
        chunks.put("s1/2", b"two-".to_vec()).unwrap();
        chunks.put("s1/1", b"one-".to_vec()).unwrap();
        let dest = MemoryStore::new("complete");

        let uri = assemble(&chunks, "s1", &dest, "out.bin").await.unwrap();
        assert_eq!(uri, "mem://complete/out.bin");
        assert_eq!(dest.get("out.bin").unwrap(), b"one-two-ten");
    }

    #[tokio::test]
    async fn non_numeric_chunk_fails_and_deletes_output() {
        let chunks = MemoryStore::new("incoming");
        chunks.put("s1/1", b"a".to_vec()).unwrap();
        chunks.put("s1/notes", b"?".to_vec()).unwrap();
        let dest = MemoryStore::new("complete");

        let err = assemble(&chunks, "s1", &dest, "out.bin").await.unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidChunkName(ref n) if n == "notes"));
        assert!(dest.get("out.bin").is_none());
    }

    #[tokio::test]
    async fn empty_chunk_aborts_merge() {
        let chunks = MemoryStore::new("incoming");
        chunks.put("s1/1", b"a".to_vec()).unwrap();
        chunks.put("s1/2", Vec::new()).unwrap();
        let dest = MemoryStore::new("complete");

        let err = assemble(&chunks, "s1", &dest, "out.bin").await.unwrap_err();
        assert!(matches!(err, AssemblyError::EmptyChunk { chunk: 2 }));
        assert!(dest.get("out.bin").is_none());
    }

    #[tokio::test]
    async fn session_without_chunks_fails() {
        let chunks = MemoryStore::new("incoming");
        let dest = MemoryStore::new("complete");

        let err = assemble(&chunks, "ghost", &dest, "out.bin").await.unwrap_err();
        assert!(matches!(err, AssemblyError::NoChunks));
    }

    #[tokio::test]
    async fn invalid_destination_name_fails_create() {
        let chunks = MemoryStore::new("incoming");
        chunks.put("s1/1", b"a".to_vec()).unwrap();
        let dest = MemoryStore::new("complete");

        let err = assemble(&chunks, "s1", &dest, "../out.bin").await.unwrap_err();
        assert!(matches!(err, AssemblyError::CreateFailed(_)));
    }
}
