//! Element types a volume can hold.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayViewMut2;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;
use crate::operation::SliceMut;

/// Runtime tag for the element type of a volume or shared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Short lowercase name (`f32` / `f64`).
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" | "32" => Ok(Self::F32),
            "f64" | "float64" | "64" => Ok(Self::F64),
            other => Err(Error::Config(format!("unknown element type: {}", other))),
        }
    }
}

/// A floating point element that can live in a volume.
///
/// Filters compute in `f64` and convert back through [`Element::from_f64`], so
/// the same input always produces the same bits regardless of which process
/// applies the filter.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Runtime tag for this type.
    const TYPE: ElementType;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Narrow from `f64`.
    fn from_f64(value: f64) -> Self;

    /// Wrap a typed slice view for dispatch into a filter.
    fn slice_mut(view: ArrayViewMut2<'_, Self>) -> SliceMut<'_>;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn slice_mut(view: ArrayViewMut2<'_, Self>) -> SliceMut<'_> {
        SliceMut::F32(view)
    }
}

impl Element for f64 {
    const TYPE: ElementType = ElementType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    fn slice_mut(view: ArrayViewMut2<'_, Self>) -> SliceMut<'_> {
        SliceMut::F64(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(ElementType::F32.size(), 4);
        assert_eq!(ElementType::F64.size(), 8);
        assert_eq!(<f32 as Element>::TYPE, ElementType::F32);
        assert_eq!(<f64 as Element>::TYPE, ElementType::F64);
    }

    #[test]
    fn test_parse() {
        assert_eq!("f32".parse::<ElementType>().unwrap(), ElementType::F32);
        assert_eq!("float64".parse::<ElementType>().unwrap(), ElementType::F64);
        assert!("u16".parse::<ElementType>().is_err());
    }
}
