//! tomopar worker process.
//!
//! Spawned by the orchestrator, one per core. Speaks the length-prefixed rkyv
//! protocol on stdin/stdout and applies operations to chunks of volumes held
//! in shared memory. Logs go to stderr, since stdout carries the IPC stream.

use std::io::{BufReader, BufWriter};

use tomopar_core::operation::FilterRegistry;

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let registry = FilterRegistry::builtin();
    tracing::debug!("Worker {} started with filters {:?}", std::process::id(), registry.names());

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    tomopar_core::worker::serve(&mut reader, &mut writer, &registry)
        .map_err(|e| anyhow::anyhow!("{}", e.with_hint()))?;

    tracing::debug!("Worker {} exiting", std::process::id());
    Ok(())
}
