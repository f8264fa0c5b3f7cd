//! Cross-process control block.
//!
//! A small shared segment holding the only state that workers write
//! concurrently: the progress counter, the chunk claim cursor and the cancel
//! flag. Volume data itself needs no synchronization because chunk ranges are
//! disjoint.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic       u64              │
//! │ total       AtomicU64        │  slices in this execution
//! │ progress    AtomicU64        │  slices finished by any worker
//! │ next_chunk  AtomicU64        │  claim cursor into the chunk table
//! │ cancel      AtomicU64        │  non-zero once cancellation is requested
//! └──────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Magic value identifying an initialized control block.
pub const CONTROL_MAGIC: u64 = u64::from_le_bytes(*b"TOMOPAR1");

/// Control block shared by the orchestrator and every worker of one execution.
#[repr(C)]
#[derive(Debug)]
pub struct ControlBlock {
    magic: AtomicU64,
    total: AtomicU64,
    progress: AtomicU64,
    next_chunk: AtomicU64,
    cancel: AtomicU64,
}

impl ControlBlock {
    /// Size of the block in bytes.
    pub const SIZE: usize = std::mem::size_of::<ControlBlock>();

    /// Initialize a freshly zeroed block.
    pub(crate) fn init(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.progress.store(0, Ordering::Relaxed);
        self.next_chunk.store(0, Ordering::Relaxed);
        self.cancel.store(0, Ordering::Relaxed);
        self.magic.store(CONTROL_MAGIC, Ordering::Release);
    }

    /// Whether the block was initialized by an orchestrator.
    pub fn is_valid(&self) -> bool {
        self.magic.load(Ordering::Acquire) == CONTROL_MAGIC
    }

    /// Number of slices in this execution.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Claim the next unclaimed chunk index.
    ///
    /// Every index is handed out exactly once; callers stop when the returned
    /// index is past the end of the chunk table.
    pub fn claim_chunk(&self) -> u64 {
        self.next_chunk.fetch_add(1, Ordering::AcqRel)
    }

    /// Record `by` finished slices, returning the new count.
    pub fn advance(&self, by: u64) -> u64 {
        self.progress.fetch_add(by, Ordering::AcqRel) + by
    }

    /// Slices finished so far.
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Acquire)
    }

    /// Ask every worker to stop at its next slice boundary.
    pub fn request_cancel(&self) {
        self.cancel.store(1, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire) != 0
    }
}
