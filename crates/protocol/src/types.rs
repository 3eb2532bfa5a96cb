use serde::{Deserialize, Serialize};

use crate::constants::{STATUS_NOT_FOUND, STATUS_OK, STATUS_SERVER_ERROR};

/// Status and body returned to a flow.js client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowResponse {
    pub status: u16,
    pub message: String,
}

impl FlowResponse {
    /// 200 "OK".
    pub fn ok() -> Self {
        Self::new(STATUS_OK, "OK")
    }

    /// 404 "not found".
    pub fn not_found() -> Self {
        Self::new(STATUS_NOT_FOUND, "not found")
    }

    /// 500 with the given message.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(STATUS_SERVER_ERROR, message)
    }

    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of one assembled upload, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyReport {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    /// `true` if the assembled object matched the source checksum.
    #[serde(default)]
    pub verified: bool,
}

impl AssemblyReport {
    /// Serializes the report as a single JSON line.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
