//! In-process execution.

use ndarray::{ArrayViewMut2, ArrayViewMut3, Axis};

use super::chunk::{ChunkOutcome, process_chunk};
use super::config::ExecutionConfig;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::operation::ResolvedOperation;
use crate::partition::ChunkDescriptor;
use crate::progress::Progress;

/// Apply `operation` to every slice in order, in the calling thread.
///
/// Progress is reported after each slice and cancellation checked before
/// each one. A failure is reported against the whole volume as one chunk.
pub(crate) fn run_sequential<T: Element>(
    operation: &ResolvedOperation,
    volume: &mut ArrayViewMut3<'_, T>,
    mut pair: Option<&mut ArrayViewMut2<'_, f64>>,
    config: &ExecutionConfig,
    progress: &Progress<'_>,
) -> Result<()> {
    let num_slices = volume.len_of(Axis(0));
    let whole = ChunkDescriptor::new(0, num_slices);

    for index in 0..num_slices {
        let outcome = process_chunk(
            operation,
            volume,
            pair.as_deref_mut(),
            ChunkDescriptor::new(index, index + 1),
            || config.is_cancelled(),
            progress,
        );
        match outcome {
            ChunkOutcome::Done => {
                progress.report();
            }
            ChunkOutcome::Cancelled { .. } => {
                return Err(Error::Cancelled {
                    completed: progress.current(),
                    total: progress.total(),
                });
            }
            ChunkOutcome::Failed { slice, error } => {
                return Err(Error::ChunkFailure {
                    chunk: whole,
                    slice: slice as u64,
                    cause: error.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FilterRegistry, OperationDescriptor};
    use crate::progress::{CancelToken, ProgressSink};
    use ndarray::{Array2, Array3};
    use std::sync::{Arc, Mutex};

    fn resolve(id: &str, name: &str, value: f64) -> ResolvedOperation {
        let registry = FilterRegistry::builtin();
        let op = OperationDescriptor::builder(id)
            .param(name, value)
            .build(&registry)
            .unwrap();
        registry.resolve(&op).unwrap()
    }

    #[test]
    fn test_reports_every_slice() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |current: u64, _total: u64| {
            sink_seen.lock().unwrap().push(current);
        });

        let op = resolve("add", "value", 2.0);
        let mut data = Array3::<f64>::zeros((3, 2, 2));
        let progress = Progress::new(3).with_sink(Some(sink));
        run_sequential(&op, &mut data.view_mut(), None, &ExecutionConfig::sequential(), &progress).unwrap();

        assert!(data.iter().all(|&v| v == 2.0));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_failure_names_whole_volume() {
        let registry = FilterRegistry::builtin();
        let op = OperationDescriptor::builder("fail_on_slice")
            .param("index", 1)
            .build(&registry)
            .unwrap();
        let op = registry.resolve(&op).unwrap();
        let mut data = Array3::<f32>::zeros((4, 1, 1));
        let progress = Progress::new(4);

        let err = run_sequential(&op, &mut data.view_mut(), None, &ExecutionConfig::sequential(), &progress)
            .unwrap_err();
        match err {
            Error::ChunkFailure { chunk, slice, .. } => {
                assert_eq!(chunk, ChunkDescriptor::new(0, 4));
                assert_eq!(slice, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(progress.current(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let config = ExecutionConfig::sequential().with_cancel(token);
        let op = resolve("add", "value", 1.0);
        let mut data = Array3::<f32>::zeros((2, 1, 1));
        let progress = Progress::new(2);

        let err = run_sequential(&op, &mut data.view_mut(), None, &config, &progress).unwrap_err();
        assert!(matches!(err, Error::Cancelled { completed: 0, total: 2 }));
        assert_eq!(data.sum(), 0.0);
    }

    #[test]
    fn test_paired_rows_follow_slices() {
        let registry = FilterRegistry::builtin();
        let op = OperationDescriptor::builder("divide_by_counts").build(&registry).unwrap();
        let op = registry.resolve(&op).unwrap();
        let mut data = Array3::<f64>::from_elem((3, 1, 2), 6.0);
        let mut counts = Array2::from_shape_vec((3, 1), vec![1.0, 2.0, 3.0]).unwrap();
        let progress = Progress::new(3);

        run_sequential(
            &op,
            &mut data.view_mut(),
            Some(&mut counts.view_mut()),
            &ExecutionConfig::sequential(),
            &progress,
        )
        .unwrap();
        assert_eq!(data[[0, 0, 0]], 6.0);
        assert_eq!(data[[1, 0, 1]], 3.0);
        assert_eq!(data[[2, 0, 0]], 2.0);
    }
}
