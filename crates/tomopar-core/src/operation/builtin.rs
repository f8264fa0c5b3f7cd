//! Built-in filters.

use std::time::Duration;

use ndarray::{Array2, ArrayViewMut1};

use super::descriptor::{Forwarding, Parameters};
use super::filter::{Filter, FilterError, FilterRegistry, SliceMut};
use super::gaussian::Gaussian;
use crate::error::{Error, Result};

/// Value substituted for zero intensities before taking the logarithm.
pub const MINUS_LOG_FLOOR: f64 = 1e-6;

/// Longest pause accepted by the `delay` filter.
pub const MAX_DELAY_MILLIS: i64 = 60_000;

pub(crate) fn register_builtin(registry: &mut FilterRegistry) {
    registry
        .register(Add)
        .register(Scale)
        .register(Clip)
        .register(MinusLog)
        .register(DivideByCounts)
        .register(Gaussian)
        .register(FailOnSlice)
        .register(Delay);
}

/// Adds a constant to every element.
pub struct Add;

impl Filter for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn summary(&self) -> &'static str {
        "add a constant: value"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        params.expect_only(&["value"])?;
        params.require_f64("value").map(|_| ())
    }

    fn apply(
        &self,
        _index: usize,
        slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        let value = params.require_f64("value")?;
        slice.map_inplace(|v| v + value);
        Ok(())
    }
}

/// Multiplies every element by a constant.
pub struct Scale;

impl Filter for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn summary(&self) -> &'static str {
        "multiply by a constant: factor"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        params.expect_only(&["factor"])?;
        params.require_f64("factor").map(|_| ())
    }

    fn apply(
        &self,
        _index: usize,
        slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        let factor = params.require_f64("factor")?;
        slice.map_inplace(|v| v * factor);
        Ok(())
    }
}

/// Clamps elements into `[min, max]`; either bound may be omitted.
pub struct Clip;

impl Clip {
    fn bounds(params: &Parameters) -> Result<(f64, f64)> {
        params.expect_only(&["min", "max"])?;
        let min = params.f64("min")?;
        let max = params.f64("max")?;
        match (min, max) {
            (None, None) => Err(Error::UnsupportedParameter {
                name: "min".to_string(),
                reason: "clip needs at least one of min or max".to_string(),
            }),
            (Some(lo), Some(hi)) if lo > hi => Err(Error::UnsupportedParameter {
                name: "min".to_string(),
                reason: format!("min {} is greater than max {}", lo, hi),
            }),
            (lo, hi) => Ok((lo.unwrap_or(f64::NEG_INFINITY), hi.unwrap_or(f64::INFINITY))),
        }
    }
}

impl Filter for Clip {
    fn name(&self) -> &'static str {
        "clip"
    }

    fn summary(&self) -> &'static str {
        "clamp values: min, max"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        Self::bounds(params).map(|_| ())
    }

    fn apply(
        &self,
        _index: usize,
        slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        let (lo, hi) = Self::bounds(params)?;
        slice.map_inplace(|v| v.max(lo).min(hi));
        Ok(())
    }
}

/// Converts transmitted intensity to absorption: `-ln(v)`.
pub struct MinusLog;

impl Filter for MinusLog {
    fn name(&self) -> &'static str {
        "minus_log"
    }

    fn summary(&self) -> &'static str {
        "negative natural logarithm, zeros replaced by 1e-6"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        params.expect_only(&[])
    }

    fn apply(
        &self,
        _index: usize,
        slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        _params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        // Negative intensities are left to produce NaN.
        slice.map_inplace(|v| -(if v == 0.0 { MINUS_LOG_FLOOR } else { v }).ln());
        Ok(())
    }
}

/// Divides each slice by the first column of its paired row.
///
/// The paired array usually holds normalised beam monitor counts, one row per
/// projection; see [`normalised_counts`].
pub struct DivideByCounts;

impl Filter for DivideByCounts {
    fn name(&self) -> &'static str {
        "divide_by_counts"
    }

    fn summary(&self) -> &'static str {
        "divide each slice by its paired count"
    }

    fn forwarding(&self) -> Forwarding {
        Forwarding::InPlace2
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        params.expect_only(&[])
    }

    fn apply(
        &self,
        index: usize,
        slice: SliceMut<'_>,
        pair: Option<ArrayViewMut1<'_, f64>>,
        _params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        let row = pair.ok_or_else(|| FilterError::new("missing paired counts"))?;
        let count = row
            .first()
            .copied()
            .ok_or_else(|| FilterError::new(format!("paired row {} is empty", index)))?;
        if count == 0.0 || !count.is_finite() {
            return Err(FilterError::new(format!(
                "count {} for slice {} cannot be used as a divisor",
                count, index
            )));
        }
        slice.map_inplace(|v| v / count);
        Ok(())
    }
}

/// Build the paired array for [`DivideByCounts`] from raw monitor counts,
/// normalised to the first projection.
pub fn normalised_counts(counts: &[f64]) -> Result<Array2<f64>> {
    let first = counts
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidOperation("no counts given".to_string()))?;
    if first == 0.0 || !first.is_finite() {
        return Err(Error::InvalidOperation(format!(
            "first count {} cannot be used for normalisation",
            first
        )));
    }
    Ok(Array2::from_shape_fn((counts.len(), 1), |(i, _)| counts[i] / first))
}

/// Fails on one chosen slice and leaves the rest untouched.
///
/// Useful for exercising failure propagation end to end.
pub struct FailOnSlice;

impl FailOnSlice {
    fn target(params: &Parameters) -> Result<usize> {
        params.expect_only(&["index"])?;
        let index = params.require_i64("index")?;
        usize::try_from(index).map_err(|_| Error::UnsupportedParameter {
            name: "index".to_string(),
            reason: format!("{} is negative", index),
        })
    }
}

impl Filter for FailOnSlice {
    fn name(&self) -> &'static str {
        "fail_on_slice"
    }

    fn summary(&self) -> &'static str {
        "fail when reaching slice: index"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        Self::target(params).map(|_| ())
    }

    fn apply(
        &self,
        index: usize,
        _slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        if index == Self::target(params)? {
            return Err(FilterError::new(format!("injected failure at slice {}", index)));
        }
        Ok(())
    }
}

/// Sleeps before each slice without modifying it.
pub struct Delay;

impl Delay {
    fn duration(params: &Parameters) -> Result<Duration> {
        params.expect_only(&["millis"])?;
        let millis = params.require_i64("millis")?;
        if !(0..=MAX_DELAY_MILLIS).contains(&millis) {
            return Err(Error::UnsupportedParameter {
                name: "millis".to_string(),
                reason: format!("must be between 0 and {}", MAX_DELAY_MILLIS),
            });
        }
        Ok(Duration::from_millis(millis as u64))
    }
}

impl Filter for Delay {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn summary(&self) -> &'static str {
        "sleep before each slice: millis"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        Self::duration(params).map(|_| ())
    }

    fn apply(
        &self,
        _index: usize,
        _slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        std::thread::sleep(Self::duration(params)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationDescriptor;
    use ndarray::{Array1, array};

    fn run(id: &str, params: &[(&str, f64)], slice: &mut Array2<f64>) -> std::result::Result<(), FilterError> {
        let registry = FilterRegistry::builtin();
        let mut builder = OperationDescriptor::builder(id);
        for (name, value) in params {
            builder = builder.param(name, *value);
        }
        let op = registry.resolve(&builder.build(&registry).unwrap()).unwrap();
        op.apply_slice(0, SliceMut::F64(slice.view_mut()), None)
    }

    #[test]
    fn test_add_and_scale() {
        let mut slice = array![[1.0, 2.0], [3.0, 4.0]];
        run("add", &[("value", 1.5)], &mut slice).unwrap();
        assert_eq!(slice, array![[2.5, 3.5], [4.5, 5.5]]);
        run("scale", &[("factor", 2.0)], &mut slice).unwrap();
        assert_eq!(slice, array![[5.0, 7.0], [9.0, 11.0]]);
    }

    #[test]
    fn test_clip() {
        let mut slice = array![[-1.0, 0.5], [2.0, 9.0]];
        run("clip", &[("min", 0.0), ("max", 2.0)], &mut slice).unwrap();
        assert_eq!(slice, array![[0.0, 0.5], [2.0, 2.0]]);

        let mut slice = array![[-1.0, 5.0]];
        run("clip", &[("min", 0.0)], &mut slice).unwrap();
        assert_eq!(slice, array![[0.0, 5.0]]);
    }

    #[test]
    fn test_clip_validation() {
        let registry = FilterRegistry::builtin();
        assert!(OperationDescriptor::builder("clip").build(&registry).is_err());
        assert!(
            OperationDescriptor::builder("clip")
                .param("min", 3.0)
                .param("max", 1.0)
                .build(&registry)
                .is_err()
        );
    }

    #[test]
    fn test_minus_log() {
        let mut slice = array![[1.0, std::f64::consts::E], [0.0, -2.0]];
        run("minus_log", &[], &mut slice).unwrap();
        assert_eq!(slice[[0, 0]], 0.0);
        assert!((slice[[0, 1]] + 1.0).abs() < 1e-12);
        assert!((slice[[1, 0]] - MINUS_LOG_FLOOR.ln().abs()).abs() < 1e-9);
        assert!(slice[[1, 1]].is_nan());
    }

    #[test]
    fn test_divide_by_counts() {
        let registry = FilterRegistry::builtin();
        let op = OperationDescriptor::builder("divide_by_counts").build(&registry).unwrap();
        assert_eq!(op.forwarding(), Forwarding::InPlace2);
        let op = registry.resolve(&op).unwrap();

        let mut slice = array![[2.0f32, 4.0]];
        let mut counts = Array1::from(vec![2.0]);
        op.apply_slice(3, SliceMut::F32(slice.view_mut()), Some(counts.view_mut()))
            .unwrap();
        assert_eq!(slice, array![[1.0f32, 2.0]]);

        let mut zero = Array1::from(vec![0.0]);
        let err = op
            .apply_slice(3, SliceMut::F32(slice.view_mut()), Some(zero.view_mut()))
            .unwrap_err();
        assert!(err.message().contains("slice 3"));
    }

    #[test]
    fn test_normalised_counts() {
        let counts = normalised_counts(&[4.0, 2.0, 8.0]).unwrap();
        assert_eq!(counts, array![[1.0], [0.5], [2.0]]);
        assert!(normalised_counts(&[]).is_err());
        assert!(normalised_counts(&[0.0, 1.0]).is_err());
    }

    #[test]
    fn test_fail_on_slice() {
        let registry = FilterRegistry::builtin();
        let op = OperationDescriptor::builder("fail_on_slice")
            .param("index", 2)
            .build(&registry)
            .unwrap();
        let op = registry.resolve(&op).unwrap();
        let mut slice = Array2::<f32>::zeros((1, 1));
        assert!(op.apply_slice(1, SliceMut::F32(slice.view_mut()), None).is_ok());
        let err = op.apply_slice(2, SliceMut::F32(slice.view_mut()), None).unwrap_err();
        assert_eq!(err.message(), "injected failure at slice 2");

        assert!(
            OperationDescriptor::builder("fail_on_slice")
                .param("index", -1)
                .build(&registry)
                .is_err()
        );
    }

    #[test]
    fn test_delay_bounds() {
        let registry = FilterRegistry::builtin();
        assert!(
            OperationDescriptor::builder("delay")
                .param("millis", 5)
                .build(&registry)
                .is_ok()
        );
        assert!(
            OperationDescriptor::builder("delay")
                .param("millis", MAX_DELAY_MILLIS + 1)
                .build(&registry)
                .is_err()
        );
        assert!(
            OperationDescriptor::builder("delay")
                .param("millis", 2.5)
                .build(&registry)
                .is_err()
        );
    }
}
