//! Resumable chunked uploads: chunk receiver and assembly pipeline.
//!
//! A file arrives as numbered chunks. [`ChunkReceiver`] persists each chunk
//! through the storage contracts and recomputes whether the session is
//! complete. A complete [`UploadSession`] is wrapped in an [`AssemblyTask`]
//! and posted to the [`Assembler`], whose merge workers concatenate the
//! chunks in sequence order into the destination and hand the outcome to a
//! single notifier that runs the task's callback.

mod assembler;
mod chunked;
mod config;
pub mod flow;
mod merge;
mod receiver;
mod task;
mod types;
mod validation;

pub use assembler::Assembler;
pub use chunked::{
    ChunkReader, FileChunk, calculate_file_checksum, checksum_bytes, checksum_reader,
};
pub use config::AssemblerConfig;
pub use receiver::ChunkReceiver;
pub use task::{AssemblyTask, CompletionCallback, UploadOutcome};
pub use types::{ChunkUpload, Completeness, UploadSession};
pub use validation::validate_session_id;

use chunkflow_storage::StorageError;

/// Default number of merge workers.
///
/// Kept small: every worker holds one open destination writer, and object
/// store backends count those as concurrent connections.
pub const DEFAULT_WORKERS: usize = 2;

/// Default capacity of the work and result queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default chunk size used when splitting local files: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors returned by [`ChunkReceiver::receive_chunk`].
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("invalid chunk request: {0}")]
    InvalidRequest(String),

    #[error("failed to create chunk: {0}")]
    CreateFailed(#[source] StorageError),

    #[error("failed to copy chunk data: {0}")]
    CopyFailed(#[source] std::io::Error),

    #[error("chunk size mismatch: declared {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("failed to close chunk: {0}")]
    CloseFailed(#[source] StorageError),

    #[error("failed to list session chunks: {0}")]
    ListFailed(#[source] StorageError),
}

/// Errors recorded on an [`AssemblyTask`] and delivered through its callback.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("failed to create destination: {0}")]
    CreateFailed(#[source] StorageError),

    #[error("failed to list session chunks: {0}")]
    ListFailed(#[source] StorageError),

    #[error("session has no chunks")]
    NoChunks,

    #[error("invalid chunk name: {0:?}")]
    InvalidChunkName(String),

    #[error("failed to open chunk {chunk}: {source}")]
    OpenFailed { chunk: u64, source: StorageError },

    #[error("failed to copy chunk {chunk} into destination: {source}")]
    CopyFailed { chunk: u64, source: std::io::Error },

    #[error("chunk {chunk} is empty")]
    EmptyChunk { chunk: u64 },

    #[error("failed to close destination: {0}")]
    CloseFailed(#[source] StorageError),
}

/// Errors returned by [`Assembler`] operations.
///
/// Rejected posts hand the task back so the caller decides what to do with it.
#[derive(thiserror::Error)]
pub enum AssemblerError<T = ()> {
    #[error("no tokio runtime available to run the assembler")]
    NoRuntime,

    #[error("assembler is stopped")]
    Stopped(AssemblyTask<T>),

    #[error("session is not complete")]
    Incomplete(AssemblyTask<T>),
}

impl<T> std::fmt::Debug for AssemblerError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblerError::NoRuntime => f.write_str("NoRuntime"),
            AssemblerError::Stopped(task) => f.debug_tuple("Stopped").field(task).finish(),
            AssemblerError::Incomplete(task) => f.debug_tuple("Incomplete").field(task).finish(),
        }
    }
}

impl<T> AssemblerError<T> {
    /// Returns the rejected task, if any.
    pub fn into_task(self) -> Option<AssemblyTask<T>> {
        match self {
            AssemblerError::NoRuntime => None,
            AssemblerError::Stopped(task) | AssemblerError::Incomplete(task) => Some(task),
        }
    }
}
