//! Execution engine.
//!
//! Applies an operation to every slice of a volume, either in the calling
//! thread or across worker processes that share the volume's memory.
//!
//! # Architecture
//!
//! ```text
//! Executor::execute(volume, operation, config)
//!     │
//!     ├── sequential: slice loop in the calling thread
//!     │
//!     └── parallel:
//!             ├── Arena: control block + volume (+ paired array) segments
//!             ├── partition: chunk table over the slice axis
//!             └── WorkerPool
//!                     ├── IPC: Attach (segment handles, chunks, descriptor)
//!                     ├── IPC: Run → workers claim chunks from the control block
//!                     └── SIGKILL for workers that do not drain in time
//! ```
//!
//! Both paths run the same per-chunk loop, so deterministic operations give
//! bit-identical results either way.
//!
//! # Module Structure
//!
//! - `chunk` - Per-chunk slice loop shared with the worker
//! - `config` - ExecutionConfig and ExecutionReport
//! - `executor` - Executor, which picks and runs a strategy
//! - `sequential` - In-process slice loop with progress and cancellation

mod chunk;
mod config;
mod executor;
mod sequential;

pub(crate) use chunk::{ChunkOutcome, process_chunk};
pub use config::{
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_MIN_PARALLEL_SLICES, DEFAULT_POLL_INTERVAL, ExecutionConfig,
    ExecutionReport, ParallelMode, Strategy,
};
pub use executor::Executor;
