//! Storage capability contracts for chunked uploads.
//!
//! The upload core never talks to a concrete backend. It consumes two
//! object-safe traits:
//!
//! - [`ChunkSource`]: lists, opens and removes the numbered chunks of a session.
//! - [`Destination`]: creates, deletes, sizes and addresses named objects.
//!
//! Two backends implement both: [`FsStore`] (a directory tree) and
//! [`MemoryStore`] (an object-store style key space held in memory).

mod fs;
mod memory;
mod validation;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use validation::validate_object_name;

/// A boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Readable byte stream of one stored chunk.
pub type ChunkStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors produced by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("refusing to remove storage root: {0}")]
    RefusedRoot(String),
}

/// One chunk as currently persisted for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    /// Storage name of the chunk (its decimal sequence number).
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Writable handle to an object being created.
///
/// Bytes written are not guaranteed durable (or, for object stores, visible)
/// until [`close`](ObjectWriter::close) succeeds. Dropping a writer without
/// closing it abandons the write.
pub trait ObjectWriter: AsyncWrite + Send + Unpin {
    /// Flushes, syncs and closes the object.
    fn close(self: Box<Self>) -> StorageFuture<'static, ()>;
}

/// Read side of the contract: the chunks belonging to a session.
pub trait ChunkSource: Send + Sync {
    /// Lists the chunks currently stored for `session`, in no particular order.
    ///
    /// A session with no stored chunks yields an empty list.
    fn list_chunks<'a>(&'a self, session: &'a str) -> StorageFuture<'a, Vec<StoredChunk>>;

    /// Opens the chunk `name` of `session` for reading.
    fn open_chunk<'a>(&'a self, session: &'a str, name: &'a str) -> StorageFuture<'a, ChunkStream>;

    /// Removes every chunk of `session`. Removing a missing session succeeds.
    fn remove_session<'a>(&'a self, session: &'a str) -> StorageFuture<'a, ()>;
}

/// Write side of the contract: named objects.
pub trait Destination: Send + Sync {
    /// Creates (or truncates) `name`, creating any parent structure.
    fn create<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Box<dyn ObjectWriter>>;

    /// Deletes `name`. Deleting a missing object succeeds.
    fn delete<'a>(&'a self, name: &'a str) -> StorageFuture<'a, ()>;

    /// Returns the size of `name`, or `None` if it does not exist.
    fn size<'a>(&'a self, name: &'a str) -> StorageFuture<'a, Option<u64>>;

    /// Returns an addressable URI for `name`.
    fn uri(&self, name: &str) -> String;
}

/// Object name of chunk `number` within `session`.
pub fn chunk_key(session: &str, number: u64) -> String {
    format!("{session}/{number}")
}
