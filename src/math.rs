use itertools::{Itertools, MinMaxResult};
use ndarray::{arr2, Array, Array1, Array2};
use num_traits::Float;

use crate::error::Error;
use crate::Result;

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive.
///
/// # Panics
///
/// The generator panics in the event that `degree` cannot be converted to `i32`, which no
/// regression in this crate comes close to.
pub(crate) fn vandermonde<T: Float>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let vals = x.iter().flat_map(|xi| {
        (0..=degree).map(|i| xi.powi(i32::try_from(i).expect("polynomial degree fits in `i32`")))
    });

    Array::from_iter(vals)
        .into_shape((x.len(), degree + 1))
        .map_err(|e| Error::DegenerateRegression(e.to_string()))
}

/// Invert a 2 x 2 matrix, returning `None` when it is singular
pub(crate) fn invert_2x2(m: &Array2<f64>) -> Option<Array2<f64>> {
    let det = m[[0, 0]].mul_add(m[[1, 1]], -(m[[0, 1]] * m[[1, 0]]));
    if !det.is_normal() || det.abs() <= f64::EPSILON * (m[[0, 0]] * m[[1, 1]]).abs() {
        return None;
    }
    Some(arr2(&[[m[[1, 1]], -m[[0, 1]]], [-m[[1, 0]], m[[0, 0]]]]) / det)
}

/// Ordinary least squares fit of a straight line through `(x, y)`
///
/// Solves the normal equations of the degree one Vandermonde system, returning
/// `[intercept, slope]`.
pub(crate) fn least_squares_line(x: &[f64], y: &[f64]) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(Error::DegenerateRegression(format!(
            "{} abscissae for {} ordinates",
            x.len(),
            y.len()
        )));
    }
    let design = vandermonde(x, 1)?;
    let normal = design.t().dot(&design);
    let rhs = design.t().dot(&Array1::from_iter(y.iter().copied()));

    let inverse = invert_2x2(&normal).ok_or_else(|| {
        Error::DegenerateRegression(format!(
            "need at least two distinct log10 read depths, got {:?}",
            x.iter().copied().dedup().collect::<Vec<_>>()
        ))
    })?;
    Ok(inverse.dot(&rhs))
}

/// Smallest and largest finite value, `(NaN, NaN)` when there are none
pub(crate) fn span(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    match values
        .into_iter()
        .filter(|v| v.is_finite())
        .minmax_by(f64::total_cmp)
    {
        MinMaxResult::NoElements => (f64::NAN, f64::NAN),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    }
}
