//! Parsing of flow.js chunk request fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    FIELD_CHUNK_NUMBER, FIELD_CHUNK_SIZE, FIELD_CURRENT_CHUNK_SIZE, FIELD_FILENAME,
    FIELD_IDENTIFIER, FIELD_RELATIVE_PATH, FIELD_TOTAL_CHUNKS, FIELD_TOTAL_SIZE,
    MAX_IDENTIFIER_LEN, STATUS_BAD_REQUEST,
};

/// Errors produced while parsing request fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("flowIdentifier invalid character at index {index}")]
    InvalidIdentifier { index: usize },

    #[error("flowIdentifier longer than 256 bytes")]
    IdentifierTooLong,
}

impl FlowError {
    /// Status code reported to the client.
    pub fn status(&self) -> u16 {
        STATUS_BAD_REQUEST
    }

    /// Response body reported to the client.
    pub fn message(&self) -> String {
        match self {
            FlowError::MissingField(field) => format!("bad request - missing data {field}"),
            other => format!("bad request - {other}"),
        }
    }
}

/// One chunk request as sent by a flow.js client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRequest {
    #[serde(rename = "flowChunkNumber")]
    pub chunk_number: u64,
    #[serde(rename = "flowChunkSize")]
    pub chunk_size: u64,
    #[serde(rename = "flowCurrentChunkSize")]
    pub current_chunk_size: u64,
    #[serde(rename = "flowTotalSize")]
    pub total_size: u64,
    #[serde(rename = "flowIdentifier")]
    pub identifier: String,
    #[serde(rename = "flowFilename", default)]
    pub filename: String,
    #[serde(rename = "flowRelativePath", default)]
    pub relative_path: String,
    #[serde(rename = "flowTotalChunks")]
    pub total_chunks: u64,
}

impl FlowRequest {
    /// Parses a request from a field lookup.
    ///
    /// `field` returns the raw value of a form field, or `None` if absent.
    pub fn from_fields<'a, F>(field: F) -> Result<Self, FlowError>
    where
        F: Fn(&'static str) -> Option<&'a str>,
    {
        let require = |name: &'static str| -> Result<u64, FlowError> {
            field(name)
                .filter(|v| !v.is_empty())
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or(FlowError::MissingField(name))
        };

        let chunk_size = require(FIELD_CHUNK_SIZE)?;
        let chunk_number = require(FIELD_CHUNK_NUMBER)?;
        let current_chunk_size = require(FIELD_CURRENT_CHUNK_SIZE)?;
        let total_size = require(FIELD_TOTAL_SIZE)?;

        let identifier = field(FIELD_IDENTIFIER).unwrap_or_default();
        check_identifier(identifier)?;
        if identifier.is_empty() {
            return Err(FlowError::MissingField(FIELD_IDENTIFIER));
        }

        let filename = field(FIELD_FILENAME).unwrap_or_default().to_string();
        let relative_path = field(FIELD_RELATIVE_PATH).unwrap_or_default().to_string();
        let total_chunks = require(FIELD_TOTAL_CHUNKS)?;

        Ok(Self {
            chunk_number,
            chunk_size,
            current_chunk_size,
            total_size,
            identifier: identifier.to_string(),
            filename,
            relative_path,
            total_chunks,
        })
    }

    /// Parses a request from already-decoded form values.
    pub fn from_map(form: &HashMap<String, String>) -> Result<Self, FlowError> {
        Self::from_fields(|name| form.get(name).map(String::as_str))
    }

    /// Encodes the request back into form values.
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (FIELD_CHUNK_NUMBER.to_string(), self.chunk_number.to_string()),
            (FIELD_CHUNK_SIZE.to_string(), self.chunk_size.to_string()),
            (FIELD_CURRENT_CHUNK_SIZE.to_string(), self.current_chunk_size.to_string()),
            (FIELD_TOTAL_SIZE.to_string(), self.total_size.to_string()),
            (FIELD_IDENTIFIER.to_string(), self.identifier.clone()),
            (FIELD_FILENAME.to_string(), self.filename.clone()),
            (FIELD_RELATIVE_PATH.to_string(), self.relative_path.clone()),
            (FIELD_TOTAL_CHUNKS.to_string(), self.total_chunks.to_string()),
        ])
    }
}

/// Checks that a session identifier is safe to use as a storage path segment.
///
/// Allowed: ASCII letters, digits, `-`, `_` and `.`, except that `..` may not
/// appear anywhere. An empty identifier passes this check; callers decide
/// whether empty is acceptable.
pub fn check_identifier(identifier: &str) -> Result<(), FlowError> {
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(FlowError::IdentifierTooLong);
    }
    if identifier == "." {
        return Err(FlowError::InvalidIdentifier { index: 0 });
    }

    let bytes = identifier.as_bytes();
    for (index, &b) in bytes.iter().enumerate() {
        let allowed = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.');
        if !allowed {
            return Err(FlowError::InvalidIdentifier { index });
        }
        if b == b'.' && bytes.get(index + 1) == Some(&b'.') {
            return Err(FlowError::InvalidIdentifier { index });
        }
    }

    Ok(())
}
