//! chunkflow entry point: uploads one local file through the chunk pipeline.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON report.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config_path, job) = app::parse_args(std::env::args().skip(1))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkflow");

    let config = config::Config::load(config_path.as_deref())?;
    tracing::info!(
        incomplete = %config.incomplete_dir.display(),
        complete = %config.complete_dir.display(),
        chunk_size = config.chunk_size,
        workers = config.assembler.workers,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(app::run(config, job))?;

    println!("{}", report.to_json_line()?);

    if let Some(error) = &report.error {
        anyhow::bail!("assembly failed: {error}");
    }
    if !report.verified {
        anyhow::bail!("assembled file does not match the source checksum");
    }
    Ok(())
}
