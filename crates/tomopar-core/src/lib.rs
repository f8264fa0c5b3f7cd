//! Shared-memory parallel slice filter engine for tomographic volumes.
//!
//! This crate provides:
//! - Shared memory arena with create/attach/release lifecycle
//! - Operation descriptors resolved against a filter registry
//! - Chunk partitioning of the slice axis
//! - Worker process pool speaking a length-prefixed rkyv protocol
//! - Cross-process progress and cooperative cancellation
//! - The orchestrator choosing between sequential and parallel execution
//! - Memory estimates for preflight checks

pub mod arena;
pub mod element;
pub mod error;
pub mod estimate;
pub mod execute;
pub mod ipc;
pub mod operation;
pub mod partition;
pub mod progress;
pub mod volume;
pub mod worker;

pub use arena::{Arena, ArenaConfig, Segment, SegmentHandle, SegmentKind};
pub use element::{Element, ElementType};
pub use error::{Error, Result};
pub use estimate::{
    MemoryEstimate, checked_volume_bytes, estimate_for_index_range, full_volume_bytes,
    peak_execution_bytes, single_slice_bytes, slices_in_range,
};
pub use execute::{ExecutionConfig, ExecutionReport, Executor, ParallelMode, Strategy};
pub use operation::{
    Filter, FilterError, FilterRegistry, Forwarding, OperationDescriptor, ParamValue, Parameters,
    SliceMut, normalised_counts,
};
pub use partition::{ChunkDescriptor, partition};
pub use progress::{CancelToken, Progress, ProgressSink};
pub use volume::Volume;
