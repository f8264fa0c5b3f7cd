//! The filter trait and the registry that resolves descriptors to filters.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayViewMut1, ArrayViewMut2};

use super::descriptor::{Forwarding, OperationDescriptor, Parameters};
use crate::element::ElementType;
use crate::error::{Error, Result};

/// A mutable 2-D slice of a volume, tagged with its element type.
pub enum SliceMut<'a> {
    F32(ArrayViewMut2<'a, f32>),
    F64(ArrayViewMut2<'a, f64>),
}

impl SliceMut<'_> {
    /// Element type of the slice.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::F32(_) => ElementType::F32,
            Self::F64(_) => ElementType::F64,
        }
    }

    /// `(rows, columns)` of the slice.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::F32(view) => view.dim(),
            Self::F64(view) => view.dim(),
        }
    }

    /// Apply `f` to every element, computing in `f64`.
    pub fn map_inplace(self, f: impl Fn(f64) -> f64) {
        match self {
            Self::F32(mut view) => view.mapv_inplace(|v| f(v as f64) as f32),
            Self::F64(mut view) => view.mapv_inplace(f),
        }
    }
}

/// Failure raised by a filter on one slice.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct FilterError {
    message: String,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "filter panicked".to_string()
        };
        Self::new(format!("panic: {}", message))
    }
}

impl From<Error> for FilterError {
    fn from(err: Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A per-slice transform.
///
/// Filters are registered by name and looked up in every process that runs
/// them, so they are stateless: everything they need arrives through the
/// parameters of the [`OperationDescriptor`].
pub trait Filter: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// One-line description for listings.
    fn summary(&self) -> &'static str;

    /// How the filter receives its data.
    fn forwarding(&self) -> Forwarding {
        Forwarding::InPlace1
    }

    /// Check parameters before any worker is involved.
    fn validate_parameters(&self, params: &Parameters) -> Result<()>;

    /// Transform slice `index` in place.
    ///
    /// `pair` is the matching row of the paired array for
    /// [`Forwarding::InPlace2`] filters and `None` otherwise.
    fn apply(
        &self,
        index: usize,
        slice: SliceMut<'_>,
        pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError>;
}

/// Filters known by name.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: BTreeMap<&'static str, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in filter.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtin(&mut registry);
        registry
    }

    /// Register `filter`, replacing any filter with the same name.
    pub fn register(&mut self, filter: impl Filter + 'static) -> &mut Self {
        let name = filter.name();
        if self.filters.insert(name, Arc::new(filter)).is_some() {
            tracing::debug!("Replaced filter {}", name);
        }
        self
    }

    /// Look up a filter.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.get(name)
    }

    /// Filters in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Filter>> {
        self.filters.values()
    }

    /// Registered names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.keys().copied().collect()
    }

    /// Bind a descriptor to the filter it names.
    ///
    /// Parameters are validated again here, since the descriptor may have
    /// been built against a different registry.
    pub fn resolve(&self, descriptor: &OperationDescriptor) -> Result<ResolvedOperation> {
        let filter = self
            .get(descriptor.function_id())
            .ok_or_else(|| Error::UnknownOperation(descriptor.function_id().to_string()))?;

        if filter.forwarding() != descriptor.forwarding() {
            return Err(Error::InvalidOperation(format!(
                "{} is {}, descriptor says {}",
                filter.name(),
                filter.forwarding().name(),
                descriptor.forwarding().name()
            )));
        }
        filter.validate_parameters(descriptor.parameters())?;

        Ok(ResolvedOperation {
            filter: filter.clone(),
            descriptor: descriptor.clone(),
        })
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}

/// A descriptor bound to its filter, ready to apply.
#[derive(Clone)]
pub struct ResolvedOperation {
    filter: Arc<dyn Filter>,
    descriptor: OperationDescriptor,
}

impl ResolvedOperation {
    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    pub fn forwarding(&self) -> Forwarding {
        self.descriptor.forwarding()
    }

    /// Apply the filter to one slice.
    ///
    /// `slice` is the 2-D view at `index` and `pair` the matching row of the
    /// paired array, if any. Both sequential and worker execution go through
    /// here, which keeps their results bit-identical. A panicking filter is
    /// reported as a [`FilterError`].
    pub fn apply_slice(
        &self,
        index: usize,
        slice: SliceMut<'_>,
        pair: Option<ArrayViewMut1<'_, f64>>,
    ) -> std::result::Result<(), FilterError> {
        match (self.forwarding(), &pair) {
            (Forwarding::InPlace2, None) => {
                return Err(FilterError::new(format!(
                    "{} needs a paired array",
                    self.descriptor.function_id()
                )));
            }
            (Forwarding::InPlace1, Some(_)) => {
                return Err(FilterError::new(format!(
                    "{} does not take a paired array",
                    self.descriptor.function_id()
                )));
            }
            _ => {}
        }

        let params = self.descriptor.parameters();
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.filter.apply(index, slice, pair, params)
        }))
        .unwrap_or_else(|payload| Err(FilterError::from_panic(payload)))
    }
}

impl fmt::Debug for ResolvedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOperation")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
