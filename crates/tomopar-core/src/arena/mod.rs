//! Shared memory arena.
//!
//! Provides the create/attach/release lifecycle for the shared segments that
//! back a volume (and its auxiliary arrays) during parallel execution, plus
//! the control block workers use to coordinate.

mod control;
mod segment;

pub use control::{CONTROL_MAGIC, ControlBlock};
pub use segment::{
    Arena, ArenaConfig, SHM_DIR_ENV, Segment, SegmentHandle, SegmentKind, attach,
};
