//! File-backed shared memory segments.
//!
//! Segments live as files in a memory-backed directory (`/dev/shm` on Linux)
//! and are mapped with `MAP_SHARED`, so every process that maps the same file
//! sees the same bytes. The creating [`Arena`] owns the file; workers attach
//! by path and only unmap on drop.

use std::fs::{self, File, OpenOptions};
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use ndarray::{ArrayView, ArrayViewD, ArrayViewMutD, Dimension, IxDyn};
use rkyv::{Archive, Deserialize, Serialize};

use super::control::ControlBlock;
use crate::element::{Element, ElementType};
use crate::error::{Error, Result};

/// Environment variable overriding the segment directory.
pub const SHM_DIR_ENV: &str = "TOMOPAR_SHM_DIR";

/// What a segment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum SegmentKind {
    /// A dense row-major array of the given element type.
    Array(ElementType),
    /// A [`ControlBlock`].
    Control,
}

/// Serializable description of a shared segment.
///
/// This is what crosses the process boundary; the receiving side calls
/// [`attach`] to map the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SegmentHandle {
    /// Unique identifier.
    pub id: String,
    /// Path of the backing file.
    pub path: String,
    /// Contents of the segment.
    pub kind: SegmentKind,
    /// Array shape (empty for control segments).
    pub shape: Vec<u64>,
    /// Length of the mapping in bytes.
    pub byte_len: u64,
}

impl SegmentHandle {
    /// Shape as `usize` dimensions.
    pub fn dims(&self) -> Vec<usize> {
        self.shape.iter().map(|&d| d as usize).collect()
    }

    /// Element type for array segments.
    pub fn element_type(&self) -> Option<ElementType> {
        match self.kind {
            SegmentKind::Array(element) => Some(element),
            SegmentKind::Control => None,
        }
    }
}

/// Arena configuration.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Directory holding segment files.
    pub dir: PathBuf,
    /// Upper bound for a single segment, on top of the free space check.
    pub max_segment_bytes: Option<u64>,
}

impl ArenaConfig {
    /// Resolve the segment directory from `TOMOPAR_SHM_DIR`, falling back to
    /// `/dev/shm` when present and the system temp directory otherwise.
    pub fn from_env() -> Self {
        let dir = std::env::var_os(SHM_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let shm = Path::new("/dev/shm");
                if shm.is_dir() {
                    shm.to_path_buf()
                } else {
                    std::env::temp_dir()
                }
            });
        Self {
            dir,
            max_segment_bytes: None,
        }
    }

    /// Use segments under `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_segment_bytes: None,
        }
    }

    /// Limit the size of a single segment.
    pub fn with_max_segment_bytes(mut self, limit: u64) -> Self {
        self.max_segment_bytes = Some(limit);
        self
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Creates and tracks shared segments.
///
/// Every segment created here counts as live until it is released (explicitly
/// or by drop), which lets callers verify that no segment leaks on any exit
/// path.
pub struct Arena {
    config: ArenaConfig,
    live: Arc<AtomicUsize>,
}

impl Arena {
    /// Create an arena, making sure its directory exists.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir).map_err(|e| {
            Error::Config(format!(
                "cannot use segment directory {}: {}",
                config.dir.display(),
                e
            ))
        })?;
        Ok(Self {
            config,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The arena configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Number of segments created by this arena and not yet released.
    pub fn live_segments(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Create a zero-initialized array segment.
    pub fn create<T: Element>(&self, shape: &[usize]) -> Result<Segment> {
        let elements = shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
            .ok_or_else(|| Error::Allocation(format!("shape {:?} overflows", shape)))?;
        let byte_len = elements
            .checked_mul(T::TYPE.size() as u64)
            .ok_or_else(|| Error::Allocation(format!("shape {:?} overflows", shape)))?;
        self.allocate(SegmentKind::Array(T::TYPE), shape, byte_len)
    }

    /// Create an array segment populated with a copy of `data`.
    ///
    /// This is the single copy into shared memory; all further mutation
    /// happens on the shared bytes.
    pub fn create_from<T: Element, D: Dimension>(&self, data: ArrayView<'_, T, D>) -> Result<Segment> {
        let mut segment = self.create::<T>(data.shape())?;
        segment.view_mut::<T>()?.assign(&data.into_dyn());
        Ok(segment)
    }

    /// Create and initialize a control segment for an execution of `total` slices.
    pub fn create_control(&self, total: u64) -> Result<Segment> {
        let segment = self.allocate(SegmentKind::Control, &[], ControlBlock::SIZE as u64)?;
        segment.control_unchecked().init(total);
        Ok(segment)
    }

    fn allocate(&self, kind: SegmentKind, shape: &[usize], byte_len: u64) -> Result<Segment> {
        if byte_len == 0 {
            return Err(Error::Allocation(format!(
                "cannot create an empty segment (shape {:?})",
                shape
            )));
        }
        if let Some(limit) = self.config.max_segment_bytes {
            if byte_len > limit {
                return Err(Error::Allocation(format!(
                    "segment of {} bytes exceeds the configured limit of {} bytes",
                    byte_len, limit
                )));
            }
        }
        let available = fs2::available_space(&self.config.dir)?;
        if byte_len > available {
            return Err(Error::Allocation(format!(
                "segment of {} bytes exceeds the {} bytes available in {}",
                byte_len,
                available,
                self.config.dir.display()
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let path = self
            .config
            .dir
            .join(format!("tomopar-{}-{}.seg", std::process::id(), id));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::Allocation(format!("cannot create {}: {}", path.display(), e)))?;

        let map = match reserve_and_map(&file, byte_len) {
            Ok(map) => map,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(Error::Allocation(format!(
                    "cannot reserve {} bytes at {}: {}",
                    byte_len,
                    path.display(),
                    e
                )));
            }
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(id = %id, bytes = byte_len, ?kind, "created shared segment");

        Ok(Segment {
            handle: SegmentHandle {
                id,
                path: path.to_string_lossy().into_owned(),
                kind,
                shape: shape.iter().map(|&d| d as u64).collect(),
                byte_len,
            },
            map: ManuallyDrop::new(map),
            owner: Some(self.live.clone()),
            released: false,
        })
    }
}

fn reserve_and_map(file: &File, byte_len: u64) -> std::io::Result<MmapMut> {
    file.allocate(byte_len)?;
    file.set_len(byte_len)?;
    // SAFETY: the file was just created by us with exclusive access and the
    // requested length; other processes only map it after this returns.
    unsafe { MmapOptions::new().len(byte_len as usize).map_mut(file) }
}

/// Attach to an existing segment described by `handle`.
///
/// `kind` and `shape` are what the caller expects to find; a mismatch with the
/// handle, or a backing file that is gone or resized, is an [`Error::Attach`].
/// The returned segment does not own the file: dropping it only unmaps.
pub fn attach(handle: &SegmentHandle, kind: SegmentKind, shape: &[usize]) -> Result<Segment> {
    if handle.kind != kind {
        return Err(Error::Attach(format!(
            "segment {} holds {:?}, expected {:?}",
            handle.id, handle.kind, kind
        )));
    }
    if handle.dims() != shape {
        return Err(Error::Attach(format!(
            "segment {} has shape {:?}, expected {:?}",
            handle.id, handle.shape, shape
        )));
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&handle.path)
        .map_err(|e| Error::Attach(format!("segment {} is stale: {}", handle.id, e)))?;
    let actual = file.metadata()?.len();
    if actual != handle.byte_len {
        return Err(Error::Attach(format!(
            "segment {} is {} bytes, handle says {}",
            handle.id, actual, handle.byte_len
        )));
    }

    // SAFETY: the length was checked against the file; the owner keeps the
    // file alive until every worker has exited.
    let map = unsafe { MmapOptions::new().len(handle.byte_len as usize).map_mut(&file) }
        .map_err(|e| Error::Attach(format!("cannot map segment {}: {}", handle.id, e)))?;

    let segment = Segment {
        handle: handle.clone(),
        map: ManuallyDrop::new(map),
        owner: None,
        released: false,
    };
    if kind == SegmentKind::Control && !segment.control_unchecked().is_valid() {
        return Err(Error::Attach(format!(
            "segment {} is not an initialized control block",
            handle.id
        )));
    }
    Ok(segment)
}

/// A mapped shared segment.
///
/// Releasing consumes the segment, so a released handle cannot be used or
/// released again. Dropping an unreleased segment releases it.
pub struct Segment {
    handle: SegmentHandle,
    map: ManuallyDrop<MmapMut>,
    owner: Option<Arc<AtomicUsize>>,
    released: bool,
}

impl Segment {
    /// The serializable handle for this segment.
    pub fn handle(&self) -> &SegmentHandle {
        &self.handle
    }

    /// Whether this segment owns (and will delete) the backing file.
    pub fn is_owner(&self) -> bool {
        self.owner.is_some()
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the mapping is empty (never true for arena-created segments).
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// Typed read-only view of an array segment.
    pub fn view<T: Element>(&self) -> Result<ArrayViewD<'_, T>> {
        self.check_array::<T>()?;
        let shape = self.handle.dims();
        // SAFETY: type, length and alignment were checked above; the mapping
        // outlives the returned borrow.
        Ok(unsafe { ArrayViewD::from_shape_ptr(IxDyn(&shape), self.map.as_ptr() as *const T) })
    }

    /// Typed mutable view of an array segment.
    pub fn view_mut<T: Element>(&mut self) -> Result<ArrayViewMutD<'_, T>> {
        self.check_array::<T>()?;
        let shape = self.handle.dims();
        // SAFETY: as in `view`, and `&mut self` guarantees no other view from
        // this mapping is alive in this process.
        Ok(unsafe { ArrayViewMutD::from_shape_ptr(IxDyn(&shape), self.map.as_mut_ptr() as *mut T) })
    }

    /// The control block of a control segment.
    pub fn control(&self) -> Result<&ControlBlock> {
        if self.handle.kind != SegmentKind::Control {
            return Err(Error::Attach(format!(
                "segment {} is not a control segment",
                self.handle.id
            )));
        }
        Ok(self.control_unchecked())
    }

    fn control_unchecked(&self) -> &ControlBlock {
        // SAFETY: control segments are created with exactly `ControlBlock::SIZE`
        // bytes and mmap returns page-aligned memory; the block consists only of
        // atomics, which are valid for any bit pattern including zero.
        unsafe { &*(self.map.as_ptr() as *const ControlBlock) }
    }

    pub(crate) fn check_array<T: Element>(&self) -> Result<()> {
        if self.handle.kind != SegmentKind::Array(T::TYPE) {
            return Err(Error::Attach(format!(
                "segment {} holds {:?}, requested {} view",
                self.handle.id,
                self.handle.kind,
                T::TYPE
            )));
        }
        let expected = self.handle.dims().iter().product::<usize>() * T::TYPE.size();
        if expected != self.map.len() {
            return Err(Error::Attach(format!(
                "segment {} maps {} bytes, shape needs {}",
                self.handle.id,
                self.map.len(),
                expected
            )));
        }
        if (self.map.as_ptr() as usize) % std::mem::align_of::<T>() != 0 {
            return Err(Error::Attach(format!(
                "segment {} is not aligned for {}",
                self.handle.id,
                T::TYPE
            )));
        }
        Ok(())
    }

    /// Unmap the segment and, for the owner, delete the backing file.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        // SAFETY: `released` guards against a second drop and no view can
        // outlive `&mut self`.
        unsafe { ManuallyDrop::drop(&mut self.map) };

        if let Some(live) = self.owner.take() {
            live.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(id = %self.handle.id, "released shared segment");
            fs::remove_file(&self.handle.path)?;
        }
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!("Failed to release segment {}: {}", self.handle.id, e);
        }
    }
}
