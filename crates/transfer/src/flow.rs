//! flow.js-style check and upload handlers, without the HTTP layer.
//!
//! Both take decoded form fields and answer with a [`FlowResponse`] the
//! transport turns into a status line and body.

use std::collections::HashMap;

use tokio::io::AsyncRead;
use tracing::{debug, warn};

use chunkflow_protocol::constants::STATUS_BAD_REQUEST;
use chunkflow_protocol::{FlowRequest, FlowResponse};
use chunkflow_storage::{ChunkSource, Destination};

use crate::{ChunkReceiver, ChunkUpload, ReceiveError, UploadSession};

/// Answers whether a chunk is already stored.
///
/// 400 if the fields do not parse, 404 if the chunk is absent or its stored
/// size differs from `flowCurrentChunkSize`, 200 otherwise.
pub async fn check_chunk<S>(
    receiver: &ChunkReceiver<S>,
    form: &HashMap<String, String>,
) -> FlowResponse
where
    S: ChunkSource + Destination + 'static,
{
    let request = match FlowRequest::from_map(form) {
        Ok(request) => request,
        Err(e) => return FlowResponse::new(e.status(), e.message()),
    };

    if receiver.is_chunk_present(&ChunkUpload::from(&request)).await {
        FlowResponse::ok()
    } else {
        FlowResponse::not_found()
    }
}

/// Stores one chunk read from `body`.
///
/// Returns the session snapshot on success. The caller posts it to the
/// assembler once it [is complete](UploadSession::is_complete).
///
/// Requests the receiver rejects as invalid are answered with 400; storage
/// and transfer failures with 500.
pub async fn upload_chunk<S, R>(
    receiver: &ChunkReceiver<S>,
    form: &HashMap<String, String>,
    body: R,
) -> (Option<UploadSession>, FlowResponse)
where
    S: ChunkSource + Destination + 'static,
    R: AsyncRead + Unpin + Send,
{
    let request = match FlowRequest::from_map(form) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejected chunk request");
            return (None, FlowResponse::new(e.status(), e.message()));
        }
    };

    match receiver.receive_chunk(&ChunkUpload::from(&request), body).await {
        Ok(session) => (Some(session), FlowResponse::ok()),
        Err(ReceiveError::InvalidRequest(reason)) => {
            debug!(session = %request.identifier, %reason, "rejected chunk upload");
            let message = format!("bad request - {reason}");
            (None, FlowResponse::new(STATUS_BAD_REQUEST, message))
        }
        Err(e) => {
            warn!(
                session = %request.identifier,
                chunk = request.chunk_number,
                error = %e,
                "chunk upload failed"
            );
            (None, FlowResponse::server_error("failed to upload file"))
        }
    }
}
