//! Worker process handles.
//!
//! Provides `WorkerHandle` for spawning and talking to a `tomopar-worker`
//! process, and `WorkerKillHandle` for terminating one from another thread.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

use super::protocol::{WorkerCommand, WorkerResponse, read_message, write_message};

/// Environment variable naming the worker binary.
pub const WORKER_PATH_ENV: &str = "TOMOPAR_WORKER_PATH";

const WORKER_NAME: &str = if cfg!(windows) {
    "tomopar-worker.exe"
} else {
    "tomopar-worker"
};

/// Find the tomopar-worker binary.
///
/// Looks in the following order:
/// 1. `configured`, when given
/// 2. `TOMOPAR_WORKER_PATH` environment variable
/// 3. Same directory as the current executable (and its parent, for test
///    binaries under `target/*/deps`)
/// 4. System PATH
/// 5. `target/debug` or `target/release` of the workspace, for development
pub fn find_worker_binary(configured: Option<&Path>) -> Result<PathBuf> {
    // 1. Explicit configuration
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::Config(format!(
            "configured worker binary {} does not exist",
            path.display()
        )));
    }

    // 2. Check environment variable
    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", WORKER_PATH_ENV, path.display());
    }

    // 3. Look next to current executable
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        for dir in [Some(exe_dir.as_path()), exe_dir.parent()].into_iter().flatten() {
            let worker_path = dir.join(WORKER_NAME);
            if worker_path.exists() {
                return Ok(worker_path);
            }
        }
    }

    // 4. Try system PATH via which
    if let Ok(path) = which::which(WORKER_NAME) {
        return Ok(path);
    }

    // 5. For development: try target/debug or target/release
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in ["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(WORKER_NAME);
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(Error::Ipc(format!(
        "Could not find {} binary. Set {} or ensure it's in PATH.",
        WORKER_NAME, WORKER_PATH_ENV
    )))
}

/// Handle to a worker process.
///
/// Provides methods to send commands, receive responses, and kill the process.
pub struct WorkerHandle {
    /// The child process.
    child: Child,
    /// Buffered stdin writer.
    stdin: BufWriter<std::process::ChildStdin>,
    /// Buffered stdout reader.
    stdout: BufReader<std::process::ChildStdout>,
    /// Whether the worker has been killed.
    killed: bool,
}

impl WorkerHandle {
    /// Spawn the worker binary at `worker_path` and wait until it answers a ping.
    pub fn spawn(worker_path: &Path) -> Result<Self> {
        let mut child = Command::new(worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .spawn()
            .map_err(|e| {
                Error::Ipc(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdout".to_string()))?;

        let mut handle = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
        };

        // Verify worker is alive with a ping
        handle.send_command(&WorkerCommand::Ping)?;
        match handle.recv_response()? {
            WorkerResponse::Pong => Ok(handle),
            other => Err(Error::Ipc(format!(
                "Unexpected response from worker: {:?}",
                other
            ))),
        }
    }

    /// Send a command to the worker.
    pub fn send_command(&mut self, cmd: &WorkerCommand) -> Result<()> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        write_message(&mut self.stdin, cmd)
    }

    /// Receive a response from the worker.
    pub fn recv_response(&mut self) -> Result<WorkerResponse> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        read_message(&mut self.stdout)
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        self.killed = true;

        // Try graceful shutdown first so the worker can unmap its segments
        let _ = write_message(&mut self.stdin, &WorkerCommand::Shutdown);
        std::thread::sleep(Duration::from_millis(10));

        // Force kill if still running
        if let Err(e) = self.child.kill() {
            // InvalidInput means the process already exited, which is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker {}: {}", self.pid(), e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();

        Ok(())
    }

    /// Get the process ID of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Graceful shutdown: ask the worker to exit and wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        self.send_command(&WorkerCommand::Shutdown)?;
        match self.recv_response() {
            Ok(WorkerResponse::ShuttingDown) => {}
            Ok(other) => tracing::debug!("Worker {} answered shutdown with {:?}", self.pid(), other),
            Err(e) => tracing::debug!("Worker {} closed before acknowledging shutdown: {}", self.pid(), e),
        }

        // Mark as done so Drop does not try again
        self.killed = true;
        match self.child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(Error::Ipc(format!("Worker exited with status: {}", status))),
            Err(e) => Err(Error::Ipc(format!("Failed to wait for worker: {}", e))),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Ensure worker is killed when handle is dropped
        let _ = self.kill();
    }
}

/// Thread-safe handle for killing a worker from another thread.
///
/// Used to stop workers that do not drain in time while their handles are
/// blocked reading responses.
#[derive(Clone)]
pub struct WorkerKillHandle {
    /// Process ID of the worker.
    pid: u32,
    /// Whether the kill has been requested.
    killed: Arc<AtomicBool>,
}

impl WorkerKillHandle {
    /// Create a kill handle for a worker.
    pub fn new(worker: &WorkerHandle) -> Self {
        Self {
            pid: worker.pid(),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the worker process.
    ///
    /// This can be called from any thread and will immediately
    /// terminate the worker process.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return; // Already killed
        }

        #[cfg(unix)]
        {
            // SIGKILL for immediate termination
            unsafe {
                libc::kill(self.pid as i32, libc::SIGKILL);
            }
        }
    }

    /// Check if kill has been requested.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_must_exist() {
        let err = find_worker_binary(Some(Path::new("/nonexistent/tomopar-worker")));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_configured_path_wins() {
        let temp = tempfile::TempDir::new().unwrap();
        let fake = temp.path().join("my-worker");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_worker_binary(Some(&fake)).unwrap(), fake);
    }

    #[test]
    fn test_spawn_failure_is_ipc_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = WorkerHandle::spawn(&temp.path().join("missing"));
        assert!(matches!(err, Err(Error::Ipc(_))));
    }
}
