//! The execution orchestrator.

use std::path::PathBuf;
use std::time::Instant;

use ndarray::{Array2, Ix2, Ix3};

use super::config::{ExecutionConfig, ExecutionReport, ParallelMode, Strategy};
use super::sequential::run_sequential;
use crate::arena::{Arena, ArenaConfig, Segment};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::ipc::{PoolJob, RunOptions, WorkerPool, find_worker_binary};
use crate::operation::{FilterRegistry, Forwarding, OperationDescriptor, ResolvedOperation};
use crate::partition::partition;
use crate::progress::Progress;
use crate::volume::Volume;

/// Runs operations over volumes, sequentially or across worker processes.
///
/// Every shared segment an execution creates is released before `execute`
/// returns, on success, failure and cancellation alike.
pub struct Executor {
    arena: Arena,
    registry: FilterRegistry,
}

enum Plan {
    Sequential,
    Parallel { worker_path: PathBuf, cores: usize },
}

impl Executor {
    /// An executor with segments in the default directory and the built-in filters.
    pub fn new() -> Result<Self> {
        Ok(Self::with_parts(
            Arena::new(ArenaConfig::from_env())?,
            FilterRegistry::builtin(),
        ))
    }

    /// An executor over an existing arena and registry.
    ///
    /// The registry is only used for the in-process path and for validation;
    /// workers resolve descriptors against their own registry.
    pub fn with_parts(arena: Arena, registry: FilterRegistry) -> Self {
        Self { arena, registry }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Apply a one-input operation to every slice of `volume`, in place.
    ///
    /// On the parallel path a heap volume is copied into a shared segment
    /// and copied back on success, so it briefly needs twice its size (see
    /// [`peak_execution_bytes`](crate::estimate::peak_execution_bytes)). A
    /// volume from [`Volume::into_shared`] is filtered where it lies.
    pub fn execute<T: Element>(
        &self,
        volume: &mut Volume<T>,
        operation: &OperationDescriptor,
        config: &ExecutionConfig,
    ) -> Result<ExecutionReport> {
        self.run(volume, None, operation, config)
    }

    /// Apply a two-input operation: slice `i` of `volume` together with row
    /// `i` of `pair`, both in place.
    pub fn execute_paired<T: Element>(
        &self,
        volume: &mut Volume<T>,
        pair: &mut Array2<f64>,
        operation: &OperationDescriptor,
        config: &ExecutionConfig,
    ) -> Result<ExecutionReport> {
        self.run(volume, Some(pair), operation, config)
    }

    fn run<T: Element>(
        &self,
        volume: &mut Volume<T>,
        pair: Option<&mut Array2<f64>>,
        operation: &OperationDescriptor,
        config: &ExecutionConfig,
    ) -> Result<ExecutionReport> {
        let started = Instant::now();
        let resolved = self.registry.resolve(operation)?;
        let num_slices = volume.num_slices();

        match (resolved.forwarding(), &pair) {
            (Forwarding::InPlace2, None) => {
                return Err(Error::InvalidOperation(format!(
                    "{} needs a paired array",
                    operation.function_id()
                )));
            }
            (Forwarding::InPlace1, Some(_)) => {
                return Err(Error::InvalidOperation(format!(
                    "{} takes a single array",
                    operation.function_id()
                )));
            }
            (_, Some(pair)) if pair.nrows() != num_slices || pair.ncols() == 0 => {
                return Err(Error::InvalidOperation(format!(
                    "paired array has shape {:?}, expected {} non-empty rows",
                    pair.shape(),
                    num_slices
                )));
            }
            _ => {}
        }

        let progress = Progress::new(num_slices as u64).with_sink(config.progress.clone());
        if num_slices == 0 {
            progress.finish();
            return Ok(ExecutionReport {
                strategy: Strategy::Sequential,
                workers: 0,
                chunks: 0,
                slices_processed: 0,
                elapsed: started.elapsed(),
            });
        }
        if config.is_cancelled() {
            return Err(Error::Cancelled {
                completed: 0,
                total: num_slices as u64,
            });
        }

        // Segments cannot be empty, so slices without pixels stay in-process.
        let plan = if volume.nbytes() == 0 {
            Plan::Sequential
        } else {
            self.plan(num_slices, config)
        };
        let report = match plan {
            Plan::Sequential => {
                tracing::info!(
                    "Running {} over {} slices sequentially",
                    operation.function_id(),
                    num_slices
                );
                let mut view = volume.view_mut();
                let mut pair_view = pair.map(|p| p.view_mut());
                run_sequential(&resolved, &mut view, pair_view.as_mut(), config, &progress)?;
                progress.finish();
                ExecutionReport {
                    strategy: Strategy::Sequential,
                    workers: 0,
                    chunks: 1,
                    slices_processed: num_slices as u64,
                    elapsed: started.elapsed(),
                }
            }
            Plan::Parallel { worker_path, cores } => {
                let mut report = self.run_parallel(volume, pair, &resolved, config, &worker_path, cores)?;
                report.elapsed = started.elapsed();
                report
            }
        };

        tracing::info!(
            "Finished {} over {} slices in {:.3}s ({:?}, {} workers)",
            operation.function_id(),
            num_slices,
            report.elapsed.as_secs_f64(),
            report.strategy,
            report.workers
        );
        Ok(report)
    }

    fn plan(&self, num_slices: usize, config: &ExecutionConfig) -> Plan {
        if config.parallel == ParallelMode::Disabled {
            return Plan::Sequential;
        }
        let cores = config.resolved_cores().min(num_slices);
        if cores <= 1 {
            tracing::debug!("One usable core for {} slices, running sequentially", num_slices);
            return Plan::Sequential;
        }
        if num_slices < config.min_parallel_slices {
            tracing::debug!(
                "{} slices is below the parallel threshold of {}",
                num_slices,
                config.min_parallel_slices
            );
            return Plan::Sequential;
        }
        match find_worker_binary(config.worker_path.as_deref()) {
            Ok(worker_path) => Plan::Parallel { worker_path, cores },
            Err(e) => {
                tracing::warn!("Parallel execution unavailable, running sequentially: {}", e);
                Plan::Sequential
            }
        }
    }

    fn run_parallel<T: Element>(
        &self,
        volume: &mut Volume<T>,
        pair: Option<&mut Array2<f64>>,
        operation: &ResolvedOperation,
        config: &ExecutionConfig,
        worker_path: &std::path::Path,
        cores: usize,
    ) -> Result<ExecutionReport> {
        let num_slices = volume.num_slices();
        let chunks = partition(num_slices, config.chunk_size, cores)?;
        let workers = cores.min(chunks.len());
        tracing::info!(
            "Running {} over {} slices with {} workers in {} chunks",
            operation.descriptor().function_id(),
            num_slices,
            workers,
            chunks.len()
        );

        let control = self.arena.create_control(num_slices as u64)?;
        // Shared volumes are attached directly; heap volumes are staged once.
        let (volume_handle, staged) = match volume.segment_handle() {
            Some(handle) => (handle.clone(), None),
            None => {
                let segment = self.arena.create_from(volume.view())?;
                (segment.handle().clone(), Some(segment))
            }
        };
        let pair_segment = match &pair {
            Some(pair) => Some(self.arena.create_from(pair.view())?),
            None => None,
        };

        let summary = {
            let progress = Progress::shared(control.control()?).with_sink(config.progress.clone());
            let job = PoolJob {
                volume: &volume_handle,
                pair: pair_segment.as_ref().map(Segment::handle),
                control: &control,
                chunks: &chunks,
                operation: operation.descriptor(),
            };
            let options = RunOptions {
                cancel: config.cancel.clone(),
                poll_interval: config.poll_interval,
                drain_timeout: config.drain_timeout,
            };

            let mut pool = WorkerPool::spawn(worker_path, workers)?;
            let summary = pool.run(&job, &progress, &options);
            match &summary {
                Ok(_) => {
                    if let Err(e) = pool.shutdown() {
                        tracing::warn!("Worker pool did not shut down cleanly: {}", e);
                    }
                }
                Err(e) => {
                    tracing::debug!("Parallel execution failed, killing workers: {}", e);
                    drop(pool);
                }
            }
            let summary = summary?;

            if let Some(segment) = &staged {
                let result = segment
                    .view::<T>()?
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| Error::Attach(e.to_string()))?;
                volume.view_mut().assign(&result);
            }
            if let (Some(pair), Some(segment)) = (pair, &pair_segment) {
                let result = segment
                    .view::<f64>()?
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| Error::Attach(e.to_string()))?;
                pair.assign(&result);
            }
            progress.finish();
            summary
        };

        control.release()?;
        if let Some(segment) = staged {
            segment.release()?;
        }
        if let Some(segment) = pair_segment {
            segment.release()?;
        }

        Ok(ExecutionReport {
            strategy: Strategy::Parallel,
            workers,
            chunks: chunks.len(),
            slices_processed: summary.slices,
            elapsed: Default::default(),
        })
    }
}
