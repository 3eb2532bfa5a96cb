//! Request fields, status codes and report types shared by the chunked
//! upload crates.
//!
//! The field names follow the flow.js upload client (`flowChunkNumber`,
//! `flowIdentifier`, ...). Parsing is transport-agnostic: callers pass a
//! field lookup, not an HTTP request.

pub mod constants;
pub mod flow;
pub mod types;

// Re-export primary types for convenience.
pub use flow::{FlowError, FlowRequest, check_identifier};
pub use types::{AssemblyReport, FlowResponse};
