//! Three-dimensional volumes.
//!
//! A volume is a dense `(slices, rows, columns)` array. It lives either on the
//! heap or in a shared segment; the latter can be handed to workers directly,
//! with no copy in or out.

use ndarray::{Array3, ArrayView3, ArrayViewMut3, Ix3};

use crate::arena::{Arena, Segment, SegmentHandle};
use crate::element::{Element, ElementType};
use crate::error::{Error, Result};

enum Storage<T: Element> {
    Heap(Array3<T>),
    Shared(Segment),
}

/// A stack of 2-D slices along axis 0.
pub struct Volume<T: Element> {
    storage: Storage<T>,
    shape: [usize; 3],
    filenames: Vec<String>,
}

impl<T: Element> Volume<T> {
    /// Wrap a heap array.
    ///
    /// Non-standard layouts are copied into row-major order.
    pub fn from_array(data: Array3<T>) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        let (slices, rows, cols) = data.dim();
        Self {
            storage: Storage::Heap(data),
            shape: [slices, rows, cols],
            filenames: Vec::new(),
        }
    }

    /// A zero-filled heap volume.
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self::from_array(Array3::default(shape))
    }

    /// A zero-filled volume in a shared segment of `arena`.
    pub fn shared_zeros(arena: &Arena, shape: [usize; 3]) -> Result<Self> {
        Self::from_segment(arena.create::<T>(&shape)?, shape)
    }

    /// Move the data into a shared segment of `arena`.
    ///
    /// This is the only copy; subsequent parallel executions mutate the
    /// shared bytes in place. Already-shared volumes are returned unchanged.
    pub fn into_shared(self, arena: &Arena) -> Result<Self> {
        let Self {
            storage,
            shape,
            filenames,
        } = self;
        let segment = match storage {
            Storage::Heap(data) => arena.create_from(data.view())?,
            Storage::Shared(segment) => segment,
        };
        let mut volume = Self::from_segment(segment, shape)?;
        volume.filenames = filenames;
        Ok(volume)
    }

    fn from_segment(segment: Segment, shape: [usize; 3]) -> Result<Self> {
        segment.check_array::<T>()?;
        if segment.handle().dims() != shape {
            return Err(Error::Attach(format!(
                "segment {} has shape {:?}, expected {:?}",
                segment.handle().id,
                segment.handle().shape,
                shape
            )));
        }
        Ok(Self {
            storage: Storage::Shared(segment),
            shape,
            filenames: Vec::new(),
        })
    }

    /// Attach per-slice file names.
    pub fn with_filenames(mut self, filenames: Vec<String>) -> Self {
        self.filenames = filenames;
        self
    }

    /// Per-slice file names, if known.
    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// `[slices, rows, columns]`.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Number of slices along axis 0.
    pub fn num_slices(&self) -> usize {
        self.shape[0]
    }

    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    /// Size of the data in bytes.
    pub fn nbytes(&self) -> usize {
        self.shape
            .iter()
            .fold(T::TYPE.size(), |acc, &d| acc.saturating_mul(d))
    }

    /// Whether the data lives in a shared segment.
    pub fn is_shared(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    pub(crate) fn segment_handle(&self) -> Option<&SegmentHandle> {
        match &self.storage {
            Storage::Heap(_) => None,
            Storage::Shared(segment) => Some(segment.handle()),
        }
    }

    pub fn view(&self) -> ArrayView3<'_, T> {
        match &self.storage {
            Storage::Heap(data) => data.view(),
            // SAFETY: type, length and alignment were checked when the
            // segment was wrapped, and the mapping lives as long as `self`.
            Storage::Shared(segment) => unsafe {
                ArrayView3::from_shape_ptr(Ix3(self.shape[0], self.shape[1], self.shape[2]), segment.as_ptr() as *const T)
            },
        }
    }

    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, T> {
        let shape = self.shape;
        match &mut self.storage {
            Storage::Heap(data) => data.view_mut(),
            // SAFETY: as in `view`; `&mut self` excludes any other view.
            Storage::Shared(segment) => unsafe {
                ArrayViewMut3::from_shape_ptr(Ix3(shape[0], shape[1], shape[2]), segment.as_mut_ptr() as *mut T)
            },
        }
    }

    /// Take the data out as a heap array, releasing any shared segment.
    pub fn into_array(self) -> Result<Array3<T>> {
        match self.storage {
            Storage::Heap(data) => Ok(data),
            Storage::Shared(segment) => {
                let data = segment.view::<T>()?.into_dimensionality::<Ix3>().map_err(|e| {
                    Error::Attach(format!("segment {} is not 3-D: {}", segment.handle().id, e))
                })?.to_owned();
                segment.release()?;
                Ok(data)
            }
        }
    }

    /// Release the backing segment, if any.
    pub fn release(self) -> Result<()> {
        match self.storage {
            Storage::Heap(_) => Ok(()),
            Storage::Shared(segment) => segment.release(),
        }
    }
}

impl<T: Element> From<Array3<T>> for Volume<T> {
    fn from(data: Array3<T>) -> Self {
        Self::from_array(data)
    }
}

impl<T: Element> std::fmt::Debug for Volume<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("shape", &self.shape)
            .field("element_type", &T::TYPE)
            .field("shared", &self.is_shared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;

    #[test]
    fn test_heap_volume() {
        let data = Array3::from_shape_fn((3, 2, 2), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let mut volume = Volume::from_array(data.clone());
        assert_eq!(volume.shape(), [3, 2, 2]);
        assert_eq!(volume.num_slices(), 3);
        assert_eq!(volume.nbytes(), 48);
        assert!(!volume.is_shared());

        volume.view_mut()[[2, 1, 1]] = -1.0;
        assert_eq!(volume.view()[[2, 1, 1]], -1.0);
        assert_eq!(volume.view()[[1, 0, 1]], data[[1, 0, 1]]);
    }

    #[test]
    fn test_non_standard_layout_is_normalised() {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 12 + y * 4 + x) as f64);
        let transposed = data.clone().reversed_axes();
        let volume = Volume::from_array(transposed.clone());
        assert_eq!(volume.shape(), [4, 3, 2]);
        assert_eq!(volume.view(), transposed.view());
    }

    #[test]
    fn test_into_shared_and_back() {
        let temp = tempfile::TempDir::new().unwrap();
        let arena = Arena::new(ArenaConfig::in_dir(temp.path())).unwrap();

        let data = Array3::from_shape_fn((4, 2, 3), |(z, y, x)| (z + y + x) as f64);
        let volume = Volume::from_array(data.clone())
            .with_filenames(vec!["a.tif".into(), "b.tif".into(), "c.tif".into(), "d.tif".into()])
            .into_shared(&arena)
            .unwrap();
        assert!(volume.is_shared());
        assert_eq!(volume.filenames().len(), 4);
        assert_eq!(volume.view(), data.view());
        assert_eq!(arena.live_segments(), 1);

        let back = volume.into_array().unwrap();
        assert_eq!(back, data);
        assert_eq!(arena.live_segments(), 0);
    }

    #[test]
    fn test_shared_zeros() {
        let temp = tempfile::TempDir::new().unwrap();
        let arena = Arena::new(ArenaConfig::in_dir(temp.path())).unwrap();
        let mut volume = Volume::<f32>::shared_zeros(&arena, [2, 2, 2]).unwrap();
        assert!(volume.view().iter().all(|&v| v == 0.0));
        volume.view_mut()[[1, 1, 1]] = 5.0;
        assert_eq!(volume.view().sum(), 5.0);
        volume.release().unwrap();
        assert_eq!(arena.live_segments(), 0);
    }
}
