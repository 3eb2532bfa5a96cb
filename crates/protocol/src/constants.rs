//! Wire field names and status codes.

/// Sequence number of the chunk, starting at 1.
pub const FIELD_CHUNK_NUMBER: &str = "flowChunkNumber";
/// Nominal chunk size chosen by the client.
pub const FIELD_CHUNK_SIZE: &str = "flowChunkSize";
/// Actual size of this chunk (the last chunk may differ from the nominal size).
pub const FIELD_CURRENT_CHUNK_SIZE: &str = "flowCurrentChunkSize";
/// Size of the whole file.
pub const FIELD_TOTAL_SIZE: &str = "flowTotalSize";
/// Session identifier.
pub const FIELD_IDENTIFIER: &str = "flowIdentifier";
/// Original file name.
pub const FIELD_FILENAME: &str = "flowFilename";
/// Relative path of the file on the client.
pub const FIELD_RELATIVE_PATH: &str = "flowRelativePath";
/// Number of chunks the client will send.
pub const FIELD_TOTAL_CHUNKS: &str = "flowTotalChunks";

/// Maximum identifier length in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 256;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_SERVER_ERROR: u16 = 500;
