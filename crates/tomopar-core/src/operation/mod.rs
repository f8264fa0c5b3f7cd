//! Per-slice operations.
//!
//! An [`OperationDescriptor`] names a registered [`Filter`] plus its fixed
//! parameters. Workers receive the descriptor, resolve it against their own
//! [`FilterRegistry`] and apply the resulting [`ResolvedOperation`] to every
//! slice of the chunks they claim.

mod builtin;
mod descriptor;
mod filter;
mod gaussian;

pub use builtin::{
    Add, Clip, Delay, DivideByCounts, FailOnSlice, MAX_DELAY_MILLIS, MINUS_LOG_FLOOR, MinusLog,
    Scale, normalised_counts,
};
pub use descriptor::{
    Forwarding, MAX_STR_LEN, MAX_TUPLE_LEN, OperationBuilder, OperationDescriptor, Param,
    ParamValue, Parameters,
};
pub use filter::{Filter, FilterError, FilterRegistry, ResolvedOperation, SliceMut};
pub use gaussian::{BoundaryMode, DEFAULT_TRUNCATE, Gaussian, MAX_KERNEL_RADIUS, MAX_ORDER, gaussian_kernel};
