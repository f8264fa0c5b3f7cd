//! The per-chunk slice loop shared by in-process and worker execution.

use ndarray::{ArrayViewMut2, ArrayViewMut3, Axis};

use crate::element::Element;
use crate::operation::{FilterError, ResolvedOperation};
use crate::partition::ChunkDescriptor;
use crate::progress::Progress;

/// How a chunk ended.
#[derive(Debug)]
pub(crate) enum ChunkOutcome {
    /// Every slice was processed.
    Done,
    /// Cancellation was seen before a slice; the first `processed` slices
    /// of the chunk are complete.
    Cancelled { processed: usize },
    /// The filter failed on `slice`; later slices were not touched.
    Failed { slice: usize, error: FilterError },
}

/// Apply `operation` to each slice of `chunk`, in order.
///
/// `is_cancelled` is polled before every slice and `progress` advanced after
/// every slice, so a cancelled or failed chunk leaves whole slices behind.
pub(crate) fn process_chunk<T: Element>(
    operation: &ResolvedOperation,
    volume: &mut ArrayViewMut3<'_, T>,
    mut pair: Option<&mut ArrayViewMut2<'_, f64>>,
    chunk: ChunkDescriptor,
    is_cancelled: impl Fn() -> bool,
    progress: &Progress<'_>,
) -> ChunkOutcome {
    for index in chunk.range() {
        if is_cancelled() {
            return ChunkOutcome::Cancelled {
                processed: index - chunk.start as usize,
            };
        }
        let slice = volume.index_axis_mut(Axis(0), index);
        let row = pair.as_mut().map(|p| p.index_axis_mut(Axis(0), index));
        if let Err(error) = operation.apply_slice(index, T::slice_mut(slice), row) {
            return ChunkOutcome::Failed {
                slice: index,
                error,
            };
        }
        progress.advance(1);
    }
    ChunkOutcome::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FilterRegistry, OperationDescriptor};
    use ndarray::Array3;
    use std::cell::Cell;

    fn resolve(builder: crate::operation::OperationBuilder) -> ResolvedOperation {
        let registry = FilterRegistry::builtin();
        registry.resolve(&builder.build(&registry).unwrap()).unwrap()
    }

    #[test]
    fn test_only_chunk_slices_change() {
        let op = resolve(OperationDescriptor::builder("add").param("value", 1.0));
        let mut data = Array3::<f32>::zeros((6, 2, 2));
        let progress = Progress::new(6);

        let outcome = process_chunk(
            &op,
            &mut data.view_mut(),
            None,
            ChunkDescriptor::new(2, 4),
            || false,
            &progress,
        );
        assert!(matches!(outcome, ChunkOutcome::Done));
        assert_eq!(progress.current(), 2);
        for z in 0..6 {
            let expected = if (2..4).contains(&z) { 1.0 } else { 0.0 };
            assert!(data.index_axis(Axis(0), z).iter().all(|&v| v == expected));
        }
    }

    #[test]
    fn test_failure_stops_chunk() {
        let op = resolve(OperationDescriptor::builder("fail_on_slice").param("index", 4));
        let mut data = Array3::<f64>::zeros((6, 1, 1));
        let progress = Progress::new(6);

        let outcome = process_chunk(
            &op,
            &mut data.view_mut(),
            None,
            ChunkDescriptor::new(3, 6),
            || false,
            &progress,
        );
        match outcome {
            ChunkOutcome::Failed { slice, error } => {
                assert_eq!(slice, 4);
                assert!(error.message().contains("slice 4"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(progress.current(), 1);
    }

    #[test]
    fn test_cancel_between_slices() {
        let op = resolve(OperationDescriptor::builder("add").param("value", 1.0));
        let mut data = Array3::<f32>::zeros((4, 1, 1));
        let progress = Progress::new(4);
        let polls = Cell::new(0);

        let outcome = process_chunk(
            &op,
            &mut data.view_mut(),
            None,
            ChunkDescriptor::new(0, 4),
            || {
                polls.set(polls.get() + 1);
                polls.get() > 2
            },
            &progress,
        );
        assert!(matches!(outcome, ChunkOutcome::Cancelled { processed: 2 }));
        assert_eq!(progress.current(), 2);
        assert_eq!(data.sum(), 2.0);
    }
}
