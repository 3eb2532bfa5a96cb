//! Client-side chunking and SHA-256 checksums.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::DEFAULT_CHUNK_SIZE;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of everything `reader` yields.
pub async fn checksum_reader<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub async fn calculate_file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    checksum_reader(&mut file).await
}

/// One piece of a file, numbered the way the upload protocol numbers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// 1-based sequence number.
    pub number: u64,
    /// Byte offset of the chunk within the file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// Hex SHA-256 of `data`.
    pub checksum: String,
}

impl FileChunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads a file in fixed-size chunks.
///
/// Every chunk except possibly the last is exactly `chunk_size` bytes.
pub struct ChunkReader {
    file: File,
    chunk_size: u64,
    offset: u64,
    next_number: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size: chunk_size as u64,
            offset: 0,
            next_number: 1,
            file_size,
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> io::Result<Option<FileChunk>> {
        let remaining = self.file_size.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size) as usize;
        let mut data = vec![0u8; read_size];
        self.file.read_exact(&mut data).await?;

        let chunk = FileChunk {
            number: self.next_number,
            offset: self.offset,
            checksum: checksum_bytes(&data),
            data,
        };
        self.offset += read_size as u64;
        self.next_number += 1;
        Ok(Some(chunk))
    }

    /// Number of chunks the whole file splits into.
    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
