//! Execution configuration and reporting.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::progress::{CancelToken, ProgressSink};

/// Default number of slices below which execution stays in-process.
pub const DEFAULT_MIN_PARALLEL_SLICES: usize = 2;

/// Default interval between progress and cancellation checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default time workers get to stop before they are killed.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether execution may use worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelMode {
    /// Use workers when the volume and core count make it worthwhile.
    #[default]
    Auto,
    /// Always run in-process.
    Disabled,
}

/// Options for one execution.
#[derive(Clone)]
pub struct ExecutionConfig {
    /// Worker processes to use; 0 means one per available core.
    pub cores: usize,
    /// Slices per chunk; `None` gives one chunk per worker.
    pub chunk_size: Option<usize>,
    pub parallel: ParallelMode,
    /// Volumes with fewer slices run in-process.
    pub min_parallel_slices: usize,
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub cancel: Option<CancelToken>,
    /// Worker binary; discovered when `None`.
    pub worker_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cores: 0,
            chunk_size: None,
            parallel: ParallelMode::Auto,
            min_parallel_slices: DEFAULT_MIN_PARALLEL_SLICES,
            progress: None,
            cancel: None,
            worker_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl ExecutionConfig {
    /// Configuration that never spawns workers.
    pub fn sequential() -> Self {
        Self {
            parallel: ParallelMode::Disabled,
            ..Self::default()
        }
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    pub fn with_min_parallel_slices(mut self, slices: usize) -> Self {
        self.min_parallel_slices = slices;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Requested worker count with 0 resolved to the available cores.
    pub fn resolved_cores(&self) -> usize {
        if self.cores > 0 {
            return self.cores;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl fmt::Debug for ExecutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionConfig")
            .field("cores", &self.cores)
            .field("chunk_size", &self.chunk_size)
            .field("parallel", &self.parallel)
            .field("min_parallel_slices", &self.min_parallel_slices)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .field("worker_path", &self.worker_path)
            .field("poll_interval", &self.poll_interval)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

/// How an execution was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential,
    Parallel,
}

/// Summary of a finished execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub strategy: Strategy,
    /// Worker processes used (0 when sequential).
    pub workers: usize,
    pub chunks: usize,
    pub slices_processed: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}
