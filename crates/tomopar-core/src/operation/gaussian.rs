//! Separable 2-D Gaussian filter.
//!
//! Each slice is convolved along its rows and then along its columns with the
//! same sampled 1-D kernel. Samples beyond the border come from the selected
//! [`BoundaryMode`].

use std::str::FromStr;

use ndarray::{ArrayViewMut1, ArrayViewMut2, Axis};

use super::descriptor::Parameters;
use super::filter::{Filter, FilterError, SliceMut};
use crate::element::Element;
use crate::error::{Error, Result};

/// Default kernel half-width, in standard deviations.
pub const DEFAULT_TRUNCATE: f64 = 4.0;

/// Largest accepted kernel half-width, in samples.
pub const MAX_KERNEL_RADIUS: usize = 4096;

/// Highest supported derivative order.
pub const MAX_ORDER: u32 = 3;

/// How samples outside the slice are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryMode {
    /// `d c b a | a b c d | d c b a`
    Reflect,
    /// `0 0 0 0 | a b c d | 0 0 0 0`
    Constant,
    /// `a a a a | a b c d | d d d d`
    Nearest,
    /// `d c b | a b c d | c b a`
    Mirror,
    /// `a b c d | a b c d | a b c d`
    Wrap,
}

impl BoundaryMode {
    pub const NAMES: [&'static str; 5] = ["reflect", "constant", "nearest", "mirror", "wrap"];

    /// Index into a line of length `len` for position `i`, or `None` for a
    /// constant zero sample.
    fn resolve(self, i: isize, len: usize) -> Option<usize> {
        let n = len as isize;
        if (0..n).contains(&i) {
            return Some(i as usize);
        }
        let index = match self {
            Self::Constant => return None,
            Self::Nearest => i.clamp(0, n - 1),
            Self::Wrap => i.rem_euclid(n),
            Self::Reflect => {
                let m = i.rem_euclid(2 * n);
                if m < n { m } else { 2 * n - 1 - m }
            }
            Self::Mirror => {
                if n == 1 {
                    0
                } else {
                    let period = 2 * n - 2;
                    let m = i.rem_euclid(period);
                    if m < n { m } else { period - m }
                }
            }
        };
        Some(index as usize)
    }
}

impl FromStr for BoundaryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reflect" => Ok(Self::Reflect),
            "constant" => Ok(Self::Constant),
            "nearest" => Ok(Self::Nearest),
            "mirror" => Ok(Self::Mirror),
            "wrap" => Ok(Self::Wrap),
            other => Err(Error::UnsupportedParameter {
                name: "mode".to_string(),
                reason: format!(
                    "unknown mode `{}`, expected one of: {}",
                    other,
                    Self::NAMES.join(", ")
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GaussianParams {
    sigma: f64,
    mode: BoundaryMode,
    order: u32,
    truncate: f64,
}

impl GaussianParams {
    fn parse(params: &Parameters) -> Result<Self> {
        params.expect_only(&["sigma", "mode", "order", "truncate"])?;

        let sigma = params.require_f64("sigma")?;
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(invalid("sigma", "must be a finite non-negative number"));
        }
        let mode = match params.str("mode")? {
            Some(name) => name.parse()?,
            None => BoundaryMode::Reflect,
        };
        let order = params.i64("order")?.unwrap_or(0);
        if !(0..=i64::from(MAX_ORDER)).contains(&order) {
            return Err(invalid("order", "must be 0, 1, 2 or 3"));
        }
        let order = order as u32;
        let truncate = params.f64("truncate")?.unwrap_or(DEFAULT_TRUNCATE);
        if !truncate.is_finite() || truncate <= 0.0 {
            return Err(invalid("truncate", "must be a finite positive number"));
        }
        if kernel_radius(sigma, truncate) > MAX_KERNEL_RADIUS {
            return Err(Error::UnsupportedParameter {
                name: "sigma".to_string(),
                reason: format!(
                    "kernel radius {:.0} exceeds the limit of {} samples",
                    truncate * sigma,
                    MAX_KERNEL_RADIUS
                ),
            });
        }

        Ok(Self {
            sigma,
            mode,
            order,
            truncate,
        })
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::UnsupportedParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// `truncate * sigma` rounded to the nearest integer, saturating.
fn kernel_radius(sigma: f64, truncate: f64) -> usize {
    // Float to int casts saturate, so huge products stay huge.
    (truncate * sigma + 0.5) as usize
}

/// Sampled 1-D Gaussian kernel (or one of its first three derivatives),
/// indexed from `-radius` to `radius`.
///
/// The radius is `truncate * sigma` rounded to the nearest integer and capped
/// at [`MAX_KERNEL_RADIUS`]. The order 0 kernel sums to one.
pub fn gaussian_kernel(sigma: f64, order: u32, truncate: f64) -> Vec<f64> {
    let radius = kernel_radius(sigma, truncate).min(MAX_KERNEL_RADIUS) as isize;
    if sigma <= 0.0 || radius == 0 {
        return vec![if order == 0 { 1.0 } else { 0.0 }];
    }

    let variance = sigma * sigma;
    let mut weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / variance).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= sum);

    match order {
        0 => weights,
        1 => (-radius..=radius)
            .zip(weights)
            .map(|(x, w)| -(x as f64) / variance * w)
            .collect(),
        2 => (-radius..=radius)
            .zip(weights)
            .map(|(x, w)| ((x * x) as f64 - variance) / (variance * variance) * w)
            .collect(),
        _ => (-radius..=radius)
            .zip(weights)
            .map(|(x, w)| {
                let x = x as f64;
                (3.0 * x * variance - x * x * x) / (variance * variance * variance) * w
            })
            .collect(),
    }
}

/// Convolve `input` with `kernel` into `output`.
fn convolve_line(input: &[f64], kernel: &[f64], mode: BoundaryMode, output: &mut [f64]) {
    let radius = (kernel.len() / 2) as isize;
    let len = input.len();
    for (i, out) in output.iter_mut().enumerate() {
        *out = kernel
            .iter()
            .enumerate()
            .filter_map(|(k, &w)| {
                let offset = k as isize - radius;
                mode.resolve(i as isize - offset, len).map(|j| w * input[j])
            })
            .sum();
    }
}

fn filter_axis<T: Element>(
    view: &mut ArrayViewMut2<'_, T>,
    axis: Axis,
    kernel: &[f64],
    mode: BoundaryMode,
) {
    let len = view.len_of(axis);
    let mut input = vec![0.0; len];
    let mut output = vec![0.0; len];
    for mut lane in view.lanes_mut(axis) {
        for (dst, &v) in input.iter_mut().zip(lane.iter()) {
            *dst = v.to_f64();
        }
        convolve_line(&input, kernel, mode, &mut output);
        for (dst, &v) in lane.iter_mut().zip(&output) {
            *dst = T::from_f64(v);
        }
    }
}

fn filter_slice<T: Element>(mut view: ArrayViewMut2<'_, T>, kernel: &[f64], mode: BoundaryMode) {
    filter_axis(&mut view, Axis(1), kernel, mode);
    filter_axis(&mut view, Axis(0), kernel, mode);
}

/// Gaussian smoothing of each slice.
///
/// Parameters: `sigma` (required), `mode` (default `reflect`), `order`
/// (0 to 3, default 0) and `truncate` (default 4.0). A `sigma` of zero leaves
/// the data unchanged.
pub struct Gaussian;

impl Filter for Gaussian {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn summary(&self) -> &'static str {
        "2-D gaussian filter: sigma, mode, order (0-3), truncate"
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<()> {
        GaussianParams::parse(params).map(|_| ())
    }

    fn apply(
        &self,
        _index: usize,
        slice: SliceMut<'_>,
        _pair: Option<ArrayViewMut1<'_, f64>>,
        params: &Parameters,
    ) -> std::result::Result<(), FilterError> {
        let params = GaussianParams::parse(params)?;
        if params.sigma == 0.0 {
            return Ok(());
        }
        let kernel = gaussian_kernel(params.sigma, params.order, params.truncate);
        match slice {
            SliceMut::F32(view) => filter_slice(view, &kernel, params.mode),
            SliceMut::F64(view) => filter_slice(view, &kernel, params.mode),
        }
        Ok(())
    }
}
