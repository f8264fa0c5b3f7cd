//! Memory estimates for preflight checks.
//!
//! Pure calculations: nothing here allocates or touches the arena. Byte
//! counts saturate at `u64::MAX` instead of overflowing; use
//! [`checked_volume_bytes`] where an impossible shape should be an error.

use serde::Serialize;

use crate::element::ElementType;
use crate::error::{Error, Result};

/// Bytes per reported megabyte.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Bytes of one slice of a `(slices, rows, columns)` volume.
pub fn single_slice_bytes(shape: [usize; 3], element_type: ElementType) -> u64 {
    (shape[1] as u64)
        .saturating_mul(shape[2] as u64)
        .saturating_mul(element_type.size() as u64)
}

/// Bytes of the whole volume.
pub fn full_volume_bytes(shape: [usize; 3], element_type: ElementType) -> u64 {
    (shape[0] as u64).saturating_mul(single_slice_bytes(shape, element_type))
}

/// Bytes of the whole volume, or an error when the count does not fit in a `u64`.
pub fn checked_volume_bytes(shape: [usize; 3], element_type: ElementType) -> Result<u64> {
    shape
        .iter()
        .try_fold(element_type.size() as u64, |acc, &d| acc.checked_mul(d as u64))
        .ok_or_else(|| {
            Error::Config(format!(
                "volume of shape {:?} ({}) is too large to address",
                shape, element_type
            ))
        })
}

/// Number of indices in `start..end` taken every `step`.
///
/// An empty range or a zero step gives zero.
pub fn slices_in_range(start: usize, end: usize, step: usize) -> usize {
    if step == 0 || end <= start {
        return 0;
    }
    (end - start).div_ceil(step)
}

/// Bytes needed to load every `step`-th slice of `start..end`.
pub fn estimate_for_index_range(
    start: usize,
    end: usize,
    step: usize,
    shape: [usize; 3],
    element_type: ElementType,
) -> MemoryEstimate {
    let slices = slices_in_range(start, end, step) as u64;
    MemoryEstimate::from_bytes(slices.saturating_mul(single_slice_bytes(shape, element_type)))
}

/// Bytes an execution may hold at its peak, including the volume itself.
///
/// Heap volumes on the parallel path are staged through one shared copy;
/// shared volumes and sequential runs need nothing extra.
pub fn peak_execution_bytes(shape: [usize; 3], element_type: ElementType, heap_backed: bool, parallel: bool) -> u64 {
    let volume = full_volume_bytes(shape, element_type);
    if heap_backed && parallel { volume.saturating_mul(2) } else { volume }
}

/// A byte count with consistently rounded megabyte figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryEstimate {
    pub bytes: u64,
    /// Megabytes rounded to two decimal places.
    pub megabytes: f64,
    /// Megabytes rounded to the nearest whole number.
    pub whole_megabytes: u64,
}

impl MemoryEstimate {
    pub fn from_bytes(bytes: u64) -> Self {
        let exact = bytes as f64 / BYTES_PER_MB as f64;
        Self {
            bytes,
            megabytes: (exact * 100.0).round() / 100.0,
            whole_megabytes: exact.round() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_and_volume_bytes() {
        assert_eq!(single_slice_bytes([1, 100, 100], ElementType::F32), 40_000);
        assert_eq!(full_volume_bytes([10, 100, 100], ElementType::F32), 400_000);
        assert_eq!(full_volume_bytes([10, 100, 100], ElementType::F64), 800_000);
        assert_eq!(full_volume_bytes([0, 100, 100], ElementType::F32), 0);
    }

    #[test]
    fn test_empty_range_is_zero() {
        let estimate = estimate_for_index_range(0, 0, 1, [10, 100, 100], ElementType::F32);
        assert_eq!(estimate.bytes, 0);
        assert_eq!(estimate.megabytes, 0.0);
        assert_eq!(estimate_for_index_range(5, 2, 1, [10, 8, 8], ElementType::F32).bytes, 0);
        assert_eq!(estimate_for_index_range(0, 9, 0, [10, 8, 8], ElementType::F32).bytes, 0);
    }

    #[test]
    fn test_stepped_range() {
        assert_eq!(slices_in_range(0, 10, 1), 10);
        assert_eq!(slices_in_range(0, 10, 3), 4);
        assert_eq!(slices_in_range(2, 10, 4), 2);
        let estimate = estimate_for_index_range(0, 10, 2, [10, 100, 100], ElementType::F32);
        assert_eq!(estimate.bytes, 200_000);
    }

    #[test]
    fn test_rounding() {
        let estimate = MemoryEstimate::from_bytes(3 * BYTES_PER_MB / 2);
        assert_eq!(estimate.megabytes, 1.5);
        assert_eq!(estimate.whole_megabytes, 2);

        let estimate = MemoryEstimate::from_bytes(400_000);
        assert_eq!(estimate.megabytes, 0.38);
        assert_eq!(estimate.whole_megabytes, 0);
    }

    #[test]
    fn test_huge_shapes_saturate() {
        let shape = [usize::MAX, 1024, 1024];
        assert_eq!(single_slice_bytes(shape, ElementType::F64), 8 * 1024 * 1024);
        assert_eq!(full_volume_bytes(shape, ElementType::F64), u64::MAX);
        assert_eq!(peak_execution_bytes(shape, ElementType::F64, true, true), u64::MAX);
        assert_eq!(
            estimate_for_index_range(0, usize::MAX, 1, shape, ElementType::F64).bytes,
            u64::MAX
        );
        assert_eq!(single_slice_bytes([1, usize::MAX, usize::MAX], ElementType::F32), u64::MAX);

        assert!(matches!(checked_volume_bytes(shape, ElementType::F64), Err(Error::Config(_))));
        assert_eq!(checked_volume_bytes([10, 100, 100], ElementType::F32).unwrap(), 400_000);
        assert_eq!(checked_volume_bytes([0, usize::MAX, usize::MAX], ElementType::F32).unwrap(), 0);
    }

    #[test]
    fn test_peak_execution() {
        let shape = [4, 10, 10];
        assert_eq!(peak_execution_bytes(shape, ElementType::F32, true, true), 3200);
        assert_eq!(peak_execution_bytes(shape, ElementType::F32, false, true), 1600);
        assert_eq!(peak_execution_bytes(shape, ElementType::F32, true, false), 1600);
    }
}
