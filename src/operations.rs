//! Numerical aggregation kernels.
//!
//! Every aggregation folds each lane along the chosen axis in index order, independently of the
//! memory layout of the array. Reducing a permuted view therefore gives bit-identical results to
//! reducing the same axis of the original array.

use ndarray::{ArrayD, ArrayView1, ArrayViewD, Axis};
use ndarray_stats::errors::MinMaxError;
use ndarray_stats::QuantileExt;

use crate::error::MarkerError;
use crate::models::Aggregation;

/// Sequential sum of a lane.
fn lane_sum(lane: &ArrayView1<f64>) -> f64 {
    lane.iter().fold(0.0, |acc, x| acc + x)
}

fn lane_mean(lane: &ArrayView1<f64>) -> f64 {
    lane_sum(lane) / lane.len() as f64
}

/// Population variance of a lane.
fn lane_var(lane: &ArrayView1<f64>) -> f64 {
    let mean = lane_mean(lane);
    let squares = lane.iter().fold(0.0, |acc, x| {
        let d = x - mean;
        acc + d * d
    });
    squares / lane.len() as f64
}

/// Median of a lane. Any NaN makes the median NaN.
fn lane_median(lane: &ArrayView1<f64>) -> f64 {
    if lane.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }
    let mut values = lane.to_vec();
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Extremum of a lane. An undefined order (NaN present) propagates NaN.
fn lane_extremum(result: Result<&f64, MinMaxError>) -> f64 {
    match result {
        Ok(value) => *value,
        // Lanes are never empty here: empty axes are rejected before folding.
        Err(MinMaxError::EmptyInput) | Err(MinMaxError::UndefinedOrder) => f64::NAN,
    }
}

/// Aggregate `array` along `axis` with `function`.
///
/// Returns an array with one dimension fewer.
///
/// # Arguments
///
/// * `array`: The array to aggregate
/// * `axis`: Axis to collapse
/// * `function`: Aggregation applied to every lane along `axis`
pub fn aggregate(
    array: ArrayViewD<f64>,
    axis: Axis,
    function: Aggregation,
) -> Result<ArrayD<f64>, MarkerError> {
    if axis.index() >= array.ndim() {
        return Err(MarkerError::UnsupportedOperation {
            operation: format!(
                "{} over axis {} of a {}-dimensional array",
                function,
                axis.index(),
                array.ndim()
            ),
        });
    }
    if array.len_of(axis) == 0 {
        return Err(MarkerError::EmptyArray {
            title: None,
            operation: function.to_string(),
        });
    }
    let result = match function {
        Aggregation::Mean => array.map_axis(axis, |lane| lane_mean(&lane)),
        Aggregation::Median => array.map_axis(axis, |lane| lane_median(&lane)),
        Aggregation::Sum => array.map_axis(axis, |lane| lane_sum(&lane)),
        Aggregation::Max => array.map_axis(axis, |lane| lane_extremum(lane.max())),
        Aggregation::Min => array.map_axis(axis, |lane| lane_extremum(lane.min())),
        Aggregation::Std => array.map_axis(axis, |lane| lane_var(&lane).sqrt()),
        Aggregation::Var => array.map_axis(axis, |lane| lane_var(&lane)),
    };
    Ok(result)
}

/// Aggregate the leading axis of `array`.
pub fn aggregate_leading(
    array: ArrayViewD<f64>,
    function: Aggregation,
) -> Result<ArrayD<f64>, MarkerError> {
    aggregate(array, Axis(0), function)
}
