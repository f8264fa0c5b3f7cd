//! Inter-process communication with worker processes.
//!
//! Workers run as separate processes so that filters execute truly in
//! parallel and a crashing filter takes down only its worker.

mod pool;
mod protocol;
mod worker;

pub use pool::{PoolJob, PoolState, RunOptions, RunSummary, WorkerPool};
pub use protocol::{
    MAX_MESSAGE_BYTES, WorkerCommand, WorkerResponse, read_message, read_message_or_eof,
    write_message,
};
pub use worker::{WORKER_PATH_ENV, WorkerHandle, WorkerKillHandle, find_worker_binary};
