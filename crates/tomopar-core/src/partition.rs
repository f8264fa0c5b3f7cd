//! Chunk partitioning of the slice axis.
//!
//! Chunks are half-open ranges over the leading axis. For one execution they
//! are disjoint and cover `[0, num_slices)` exactly, which is what makes every
//! element single-writer without any locking.

use std::fmt;
use std::ops::Range;

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// A half-open range `[start, end)` of slice indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// First slice in the chunk.
    pub start: u64,
    /// One past the last slice in the chunk.
    pub end: u64,
}

impl ChunkDescriptor {
    /// Create a chunk covering `[start, end)`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start as u64,
            end: end as u64,
        }
    }

    /// Slice indices in this chunk.
    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }

    /// Number of slices in this chunk.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Whether the chunk covers no slices.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `index` falls inside this chunk.
    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }
}

impl fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Split `[0, num_slices)` into chunks.
///
/// With an explicit `chunk_size` every chunk has that many slices except the
/// last, which takes what is left. Without one, the slices are divided as
/// evenly as possible into one chunk per worker (clamped to `num_slices`), and
/// the last chunk absorbs the remainder.
///
/// Never emits an empty chunk and never emits more chunks than slices.
pub fn partition(
    num_slices: usize,
    chunk_size: Option<usize>,
    worker_count: usize,
) -> Result<Vec<ChunkDescriptor>> {
    if worker_count == 0 {
        return Err(Error::Config("worker count must be at least 1".to_string()));
    }
    if chunk_size == Some(0) {
        return Err(Error::Config("chunk size must be at least 1".to_string()));
    }
    if num_slices == 0 {
        return Ok(Vec::new());
    }

    let chunks = match chunk_size {
        Some(size) => (0..num_slices)
            .step_by(size)
            .map(|start| ChunkDescriptor::new(start, (start + size).min(num_slices)))
            .collect(),
        None => {
            let workers = worker_count.min(num_slices);
            let base = num_slices / workers;
            (0..workers)
                .map(|i| {
                    let start = i * base;
                    let end = if i + 1 == workers { num_slices } else { start + base };
                    ChunkDescriptor::new(start, end)
                })
                .collect()
        }
    };

    Ok(chunks)
}
