//! One end-to-end upload: split, send through the flow layer, assemble, verify.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use rand::seq::SliceRandom;
use tokio::sync::oneshot;

use chunkflow_protocol::{AssemblyReport, FlowRequest};
use chunkflow_storage::{Destination, FsStore};
use chunkflow_transfer::flow::{check_chunk, upload_chunk};
use chunkflow_transfer::{
    Assembler, AssemblyTask, ChunkReader, ChunkReceiver, FileChunk, UploadSession,
    calculate_file_checksum,
};

use crate::config::Config;

/// What to upload and how.
#[derive(Debug, Clone)]
pub struct Job {
    pub file: PathBuf,
    /// Send chunks in random order instead of sequentially.
    pub shuffle: bool,
}

/// Uploads `job.file` into `config.complete_dir` and reports the outcome.
pub async fn run(config: Config, job: Job) -> anyhow::Result<AssemblyReport> {
    let incoming = Arc::new(FsStore::new(&config.incomplete_dir));
    let complete = Arc::new(FsStore::new(&config.complete_dir));
    let receiver = ChunkReceiver::new(incoming);

    let assembler: Assembler<String> = Assembler::new(config.assembler.clone());
    assembler.start().map_err(|e| anyhow!("{e}"))?;

    let result = upload_and_assemble(&config, &job, &receiver, &assembler, &complete).await;

    assembler.stop();
    assembler.join().await;
    result
}

async fn upload_and_assemble(
    config: &Config,
    job: &Job,
    receiver: &ChunkReceiver<FsStore>,
    assembler: &Assembler<String>,
    complete: &Arc<FsStore>,
) -> anyhow::Result<AssemblyReport> {
    let filename = job
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", job.file.display()))?;

    let source_checksum = calculate_file_checksum(&job.file)
        .await
        .with_context(|| format!("hashing {}", job.file.display()))?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = upload_file(config, job, receiver, &session_id, &filename).await?;

    let (tx, rx) = oneshot::channel();
    let destination: Arc<dyn Destination> = complete.clone();
    let task = AssemblyTask::new(session, destination, source_checksum)
        .with_name(filename.clone())
        .on_complete(move |outcome| {
            let _ = tx.send(outcome);
        });
    assembler.post(task).await.map_err(|e| anyhow!("{e}"))?;

    let outcome = rx.await.context("assembler dropped the task")?;
    let expected = outcome.user_data;

    let report = match outcome.result {
        Ok(uri) => {
            let bytes = complete.size(&filename).await?.unwrap_or(0);
            let checksum = calculate_file_checksum(&complete.root().join(&filename)).await?;
            let verified = checksum == expected;
            if verified {
                tracing::info!(session = %outcome.session_id, %uri, bytes, "upload verified");
            } else {
                tracing::error!(
                    session = %outcome.session_id,
                    expected = %expected,
                    actual = %checksum,
                    "assembled file does not match source"
                );
            }
            AssemblyReport {
                session_id: outcome.session_id,
                uri: Some(uri),
                error: None,
                bytes,
                checksum,
                verified,
            }
        }
        Err(e) => AssemblyReport {
            session_id: outcome.session_id,
            uri: None,
            error: Some(e.to_string()),
            bytes: 0,
            checksum: String::new(),
            verified: false,
        },
    };

    Ok(report)
}

/// Sends every chunk of `job.file` and returns the completed session.
async fn upload_file(
    config: &Config,
    job: &Job,
    receiver: &ChunkReceiver<FsStore>,
    session_id: &str,
    filename: &str,
) -> anyhow::Result<UploadSession> {
    let mut reader = ChunkReader::open(&job.file, config.chunk_size)
        .await
        .with_context(|| format!("opening {}", job.file.display()))?;
    if reader.file_size() == 0 {
        bail!("{} is empty", job.file.display());
    }

    let template = FlowRequest {
        chunk_number: 0,
        chunk_size: reader.chunk_size(),
        current_chunk_size: 0,
        total_size: reader.file_size(),
        identifier: session_id.to_string(),
        filename: filename.to_string(),
        relative_path: filename.to_string(),
        total_chunks: reader.chunk_count(),
    };
    tracing::info!(
        session = session_id,
        file = %job.file.display(),
        bytes = template.total_size,
        chunks = template.total_chunks,
        "uploading"
    );

    let mut chunks = Vec::with_capacity(template.total_chunks as usize);
    while let Some(chunk) = reader.next_chunk().await? {
        chunks.push(chunk);
    }
    if job.shuffle {
        chunks.shuffle(&mut rand::thread_rng());
    }

    let mut completed = None;
    for chunk in chunks {
        if let Some(session) = send_chunk(receiver, &template, &chunk).await? {
            completed = Some(session);
        }
    }

    completed.ok_or_else(|| anyhow!("all chunks sent but session {session_id} is not complete"))
}

/// Checks and, if needed, uploads one chunk. Returns the session once complete.
async fn send_chunk(
    receiver: &ChunkReceiver<FsStore>,
    template: &FlowRequest,
    chunk: &FileChunk,
) -> anyhow::Result<Option<UploadSession>> {
    let form = FlowRequest {
        chunk_number: chunk.number,
        current_chunk_size: chunk.len(),
        ..template.clone()
    }
    .to_map();

    if check_chunk(receiver, &form).await.is_success() {
        tracing::debug!(chunk = chunk.number, "chunk already stored, skipping");
        return Ok(None);
    }

    let (session, response) = upload_chunk(receiver, &form, chunk.data.as_slice()).await;
    if !response.is_success() {
        bail!(
            "chunk {} rejected: {} {}",
            chunk.number,
            response.status,
            response.message
        );
    }

    Ok(session.filter(UploadSession::is_complete))
}

/// Parses the command line: `[--config <path>] [--shuffle] <file>`.
pub fn parse_args<I>(args: I) -> anyhow::Result<(Option<PathBuf>, Job)>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut shuffle = false;
    let mut file = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--shuffle" => shuffle = true,
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ if file.is_some() => bail!("only one file may be uploaded per run"),
            _ => file = Some(PathBuf::from(&arg)),
        }
    }

    let file = file.context("usage: chunkflow [--config <path>] [--shuffle] <file>")?;
    Ok((config, Job { file, shuffle }))
}
