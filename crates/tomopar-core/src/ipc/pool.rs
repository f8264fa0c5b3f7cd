//! A set of worker processes running one execution together.
//!
//! ```text
//! Idle ──spawn──▶ Spawning ──all pong──▶ Running ──failure/cancel──▶ Draining
//!                                           │                           │
//!                                           └──────all answered─────────┴──▶ Terminated
//! ```
//!
//! No worker is told to run until every worker has attached, so a worker that
//! cannot attach fails the execution before any slice is touched.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::arena::{Segment, SegmentHandle};
use crate::error::{Error, Result};
use crate::operation::OperationDescriptor;
use crate::partition::ChunkDescriptor;
use crate::progress::{CancelToken, Progress};

use super::protocol::{WorkerCommand, WorkerResponse};
use super::worker::{WorkerHandle, WorkerKillHandle};

/// Lifecycle of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Spawning,
    Running,
    Draining,
    Terminated,
}

/// What the pool runs: shared segments, chunk table and operation.
pub struct PoolJob<'a> {
    pub volume: &'a SegmentHandle,
    pub pair: Option<&'a SegmentHandle>,
    pub control: &'a Segment,
    pub chunks: &'a [ChunkDescriptor],
    pub operation: &'a OperationDescriptor,
}

/// How the pool supervises a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Mirrored into the control block while running.
    pub cancel: Option<CancelToken>,
    /// How often progress and the cancel token are checked.
    pub poll_interval: Duration,
    /// How long workers get to stop after a failure or cancellation before
    /// they are killed.
    pub drain_timeout: Duration,
}

/// Totals reported by the workers of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub chunks: u64,
    pub slices: u64,
}

struct Event {
    index: usize,
    pid: u32,
    response: Result<WorkerResponse>,
}

/// Worker processes of one execution.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    state: PoolState,
}

impl WorkerPool {
    /// Spawn `count` workers from `worker_path`.
    pub fn spawn(worker_path: &Path, count: usize) -> Result<Self> {
        let mut pool = Self {
            workers: Vec::with_capacity(count),
            state: PoolState::Idle,
        };
        pool.set_state(PoolState::Spawning);
        for _ in 0..count {
            pool.workers.push(WorkerHandle::spawn(worker_path)?);
        }
        tracing::debug!(
            "Spawned {} workers: {:?}",
            count,
            pool.workers.iter().map(WorkerHandle::pid).collect::<Vec<_>>()
        );
        Ok(pool)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn set_state(&mut self, state: PoolState) {
        transition(&mut self.state, state);
    }

    /// Run `job` on every worker until all chunks are claimed.
    ///
    /// The first chunk failure wins: it raises the cancel flag so the other
    /// workers stop at their next slice, and is returned once every worker
    /// has answered or been killed.
    pub fn run(&mut self, job: &PoolJob<'_>, progress: &Progress<'_>, options: &RunOptions) -> Result<RunSummary> {
        let block = job.control.control()?;

        // Attach barrier
        for worker in &mut self.workers {
            worker.send_command(&WorkerCommand::Attach {
                volume: job.volume.clone(),
                pair: job.pair.cloned(),
                control: job.control.handle().clone(),
                chunks: job.chunks.to_vec(),
                operation: job.operation.clone(),
            })?;
        }
        for worker in &mut self.workers {
            match worker.recv_response()? {
                WorkerResponse::Attached => {}
                WorkerResponse::Error { message } => {
                    return Err(Error::Attach(format!("worker {}: {}", worker.pid(), message)));
                }
                other => {
                    return Err(Error::Ipc(format!(
                        "Unexpected response to attach from worker {}: {:?}",
                        worker.pid(),
                        other
                    )));
                }
            }
        }

        self.set_state(PoolState::Running);
        for worker in &mut self.workers {
            worker.send_command(&WorkerCommand::Run)?;
        }

        let kill_handles: Vec<WorkerKillHandle> = self.workers.iter().map(WorkerKillHandle::new).collect();
        let (tx, rx) = mpsc::channel::<Event>();

        let mut summary = RunSummary::default();
        let mut failure: Option<Error> = None;
        let mut cancelled = false;
        let mut drain_started: Option<Instant> = None;

        std::thread::scope(|scope| {
            for (index, worker) in self.workers.iter_mut().enumerate() {
                let tx = tx.clone();
                scope.spawn(move || {
                    let pid = worker.pid();
                    let response = worker.recv_response();
                    let _ = tx.send(Event { index, pid, response });
                });
            }
            drop(tx);

            let mut answered = vec![false; kill_handles.len()];
            let mut pending = kill_handles.len();
            while pending > 0 {
                if drain_started.is_none() && options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    tracing::debug!("Cancellation requested, draining workers");
                    block.request_cancel();
                    drain_started = Some(Instant::now());
                    transition(&mut self.state, PoolState::Draining);
                }

                match rx.recv_timeout(options.poll_interval) {
                    Ok(Event { index, pid, response }) => {
                        pending -= 1;
                        answered[index] = true;
                        let killed = kill_handles[index].is_killed();
                        let problem = match response {
                            Ok(WorkerResponse::Finished { chunks, slices }) => {
                                tracing::debug!("Worker {} finished {} chunks ({} slices)", pid, chunks, slices);
                                summary.chunks += chunks;
                                summary.slices += slices;
                                None
                            }
                            Ok(WorkerResponse::Cancelled { slices }) => {
                                tracing::debug!("Worker {} stopped after {} slices", pid, slices);
                                summary.slices += slices;
                                cancelled = true;
                                None
                            }
                            Ok(WorkerResponse::ChunkFailed { chunk, slice, message }) => Some(Error::ChunkFailure {
                                chunk,
                                slice,
                                cause: message,
                            }),
                            Ok(WorkerResponse::Error { message }) => {
                                Some(Error::Ipc(format!("worker {} failed: {}", pid, message)))
                            }
                            Ok(other) => Some(Error::Ipc(format!(
                                "Unexpected response from worker {}: {:?}",
                                pid, other
                            ))),
                            Err(_) if killed => {
                                cancelled = true;
                                None
                            }
                            Err(e) => Some(Error::WorkerLost {
                                pid,
                                message: e.to_string(),
                            }),
                        };

                        if let Some(error) = problem {
                            tracing::debug!("Worker {} reported: {}", pid, error);
                            if failure.is_none() {
                                failure = Some(error);
                            }
                            block.request_cancel();
                            drain_started.get_or_insert_with(Instant::now);
                            transition(&mut self.state, PoolState::Draining);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                progress.report();

                if let Some(started) = drain_started {
                    if started.elapsed() > options.drain_timeout {
                        for (handle, _) in kill_handles.iter().zip(&answered).filter(|(_, done)| !**done) {
                            if !handle.is_killed() {
                                tracing::warn!("Worker {} did not stop in time, killing it", handle.pid());
                                handle.kill();
                            }
                        }
                    }
                }
            }
        });

        for (worker, handle) in self.workers.iter_mut().zip(&kill_handles) {
            if handle.is_killed() {
                let _ = worker.kill();
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        let completed = progress.current();
        if cancelled {
            return Err(Error::Cancelled {
                completed,
                total: progress.total(),
            });
        }
        if completed != progress.total() {
            return Err(Error::Ipc(format!(
                "workers finished {} of {} slices",
                completed,
                progress.total()
            )));
        }
        Ok(summary)
    }

    /// Ask every worker to exit.
    pub fn shutdown(mut self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.shutdown() {
                tracing::warn!("Worker shutdown failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        self.set_state(PoolState::Terminated);
        first_error.map_or(Ok(()), Err)
    }
}

fn transition(state: &mut PoolState, next: PoolState) {
    if *state != next {
        tracing::trace!("Worker pool {:?} -> {:?}", state, next);
        *state = next;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for mut worker in self.workers.drain(..) {
            let _ = worker.kill();
        }
        self.state = PoolState::Terminated;
    }
}
