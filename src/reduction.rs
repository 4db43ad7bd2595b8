//! Axis-aware reduction of marker data to a target shape.
//!
//! A reduction is planned against an [AxisMap]: preserved axes are moved to the end of the
//! array, the remaining axes are moved to the front in reduction order, and each step then
//! collapses the current leading axis. Composite markers distribute the steps that do not touch
//! channels or epochs over each operand before combining them.

use ndarray::{ArrayD, ArrayViewD};
use tracing::debug;

use crate::array;
use crate::axis_map::{AxisMap, CHANNELS, EPOCHS};
use crate::error::MarkerError;
use crate::models::{Aggregation, ReductionRequest, ReductionStep};
use crate::operations;
use crate::title::Title;

/// A reduction resolved against a concrete axis map.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionPlan {
    /// Axis permutation that places reduced axes first, in step order, followed by the preserved
    /// axes in their original relative order.
    pub permutation: Vec<usize>,
    /// Steps to apply, each to the leading axis of the permuted array.
    pub steps: Vec<ReductionStep>,
    /// Names of the axes that survive, in output order.
    pub preserved: Vec<String>,
}

/// Whether `axis` must be reduced after combining the operands of a composite marker.
fn is_combined_axis(axis: &str) -> bool {
    axis == CHANNELS || axis == EPOCHS
}

/// Resolve `request` against `axis_map`.
///
/// # Arguments
///
/// * `title`: Title of the marker being reduced, for error reporting
/// * `axis_map`: Axis map of the data to reduce
/// * `request`: The reduction request
pub fn plan(
    title: &Title,
    axis_map: &AxisMap,
    request: &ReductionRequest,
) -> Result<ReductionPlan, MarkerError> {
    let to_preserve = request.target.preserved_axes();
    let mut preserved: Vec<(&str, usize)> = Vec::with_capacity(to_preserve.len());
    for axis in to_preserve {
        let index = axis_map
            .index_of(axis)
            .ok_or_else(|| MarkerError::InvalidReductionSpec {
                title: title.clone(),
                reason: format!(
                    "target {} preserves {} which is not in {}",
                    request.target, axis, axis_map
                ),
            })?;
        preserved.push((axis, index));
    }
    preserved.sort_by_key(|(_, index)| *index);

    // Remaining axes, in axis map order.
    let mut remaining: Vec<(&str, usize)> = axis_map
        .iter()
        .filter(|(name, _)| !to_preserve.contains(name))
        .collect();

    let steps: Vec<ReductionStep> = match &request.reduction {
        None => remaining
            .iter()
            .map(|(name, _)| ReductionStep::new(*name, Aggregation::Mean))
            .collect(),
        Some(reduction) => {
            let steps: Vec<ReductionStep> = reduction
                .iter()
                .filter(|step| !to_preserve.contains(&step.axis.as_str()))
                .cloned()
                .collect();
            if steps.len() != remaining.len() {
                return Err(MarkerError::InvalidReductionSpec {
                    title: title.clone(),
                    reason: format!(
                        "{} reduction steps given for {} axes to reduce in {}",
                        steps.len(),
                        remaining.len(),
                        axis_map
                    ),
                });
            }
            steps
        }
    };

    let mut permutation = Vec::with_capacity(axis_map.len());
    for step in &steps {
        let position = remaining
            .iter()
            .position(|(name, _)| *name == step.axis)
            .ok_or_else(|| MarkerError::InvalidReductionSpec {
                title: title.clone(),
                reason: format!("cannot reduce along {}: axis not in {}", step.axis, axis_map),
            })?;
        let (_, index) = remaining.remove(position);
        permutation.push(index);
    }
    permutation.extend(preserved.iter().map(|(_, index)| *index));

    Ok(ReductionPlan {
        permutation,
        steps,
        preserved: preserved.iter().map(|(name, _)| name.to_string()).collect(),
    })
}

/// Check that `data` has one dimension per axis of `axis_map`.
fn check_rank(
    title: &Title,
    data: &ArrayViewD<f64>,
    axis_map: &AxisMap,
) -> Result<(), MarkerError> {
    if data.ndim() != axis_map.len() {
        return Err(MarkerError::InvalidAxisMap {
            title: Some(title.clone()),
            reason: format!(
                "data has {} dimensions but axis map {} has {} axes",
                data.ndim(),
                axis_map,
                axis_map.len()
            ),
        });
    }
    Ok(())
}

/// Apply `steps` in order, each collapsing the leading axis.
fn apply_steps(
    title: &Title,
    mut data: ArrayD<f64>,
    steps: &[ReductionStep],
) -> Result<ArrayD<f64>, MarkerError> {
    for step in steps {
        data = operations::aggregate_leading(data.view(), step.function)
            .map_err(|err| err.in_marker(title))?;
    }
    Ok(data)
}

/// Select picks and permute one operand according to `plan`.
fn prepare(
    title: &Title,
    data: ArrayViewD<f64>,
    axis_map: &AxisMap,
    request: &ReductionRequest,
    plan: &ReductionPlan,
) -> Result<ArrayD<f64>, MarkerError> {
    check_rank(title, &data, axis_map)?;
    let picked = array::apply_picks(
        title,
        data,
        axis_map,
        request.picks.as_ref(),
        request.target.preserved_axes(),
    )?;
    Ok(picked.permuted_axes(plan.permutation.clone()))
}

/// Reduce the data of a single-operand marker.
///
/// # Arguments
///
/// * `title`: Title of the marker being reduced
/// * `data`: Fitted data of the marker
/// * `axis_map`: Axis map of `data`
/// * `request`: The reduction request
pub fn reduce(
    title: &Title,
    data: ArrayViewD<f64>,
    axis_map: &AxisMap,
    request: &ReductionRequest,
) -> Result<ArrayD<f64>, MarkerError> {
    let plan = plan(title, axis_map, request)?;
    debug!(%title, target = %request.target, steps = plan.steps.len(), "reducing marker");
    let data = prepare(title, data, axis_map, request, &plan)?;
    apply_steps(title, data, &plan.steps)
}

/// Reduce a composite of two operands combined elementwise by `combine`.
///
/// Steps along axes other than channels and epochs are applied to each operand separately.
/// The operands are then combined once, and the remaining channel and epoch steps are applied to
/// the combined array. Channel and epoch steps must therefore come last in the reduction order.
///
/// # Arguments
///
/// * `title`: Title of the composite marker
/// * `left`: Data of the first operand
/// * `right`: Data of the second operand
/// * `axis_map`: Axis map shared by both operands
/// * `request`: The reduction request
/// * `combine`: Elementwise combination of the partially reduced operands
pub fn reduce_composite<F>(
    title: &Title,
    left: ArrayViewD<f64>,
    right: ArrayViewD<f64>,
    axis_map: &AxisMap,
    request: &ReductionRequest,
    combine: F,
) -> Result<ArrayD<f64>, MarkerError>
where
    F: FnOnce(ArrayD<f64>, ArrayD<f64>) -> Result<ArrayD<f64>, MarkerError>,
{
    let plan = plan(title, axis_map, request)?;

    let mut combined_axis_seen = false;
    for step in &plan.steps {
        if is_combined_axis(&step.axis) {
            combined_axis_seen = true;
        } else if combined_axis_seen {
            return Err(MarkerError::InvalidAxisOrder {
                title: title.clone(),
                axis: step.axis.clone(),
            });
        }
    }
    let split = plan
        .steps
        .iter()
        .position(|step| is_combined_axis(&step.axis))
        .unwrap_or(plan.steps.len());
    let (separate, combined) = plan.steps.split_at(split);
    debug!(
        %title,
        target = %request.target,
        separate = separate.len(),
        combined = combined.len(),
        "reducing composite marker"
    );

    let left = apply_steps(title, prepare(title, left, axis_map, request, &plan)?, separate)?;
    let right = apply_steps(title, prepare(title, right, axis_map, request, &plan)?, separate)?;
    let data = combine(left, right)?;
    apply_steps(title, data, combined)
}

/// Elementwise quotient of two arrays of identical shape.
pub fn divide(
    title: &Title,
    numerator: &ArrayD<f64>,
    denominator: &ArrayD<f64>,
) -> Result<ArrayD<f64>, MarkerError> {
    if numerator.shape() != denominator.shape() {
        return Err(MarkerError::ShapeMismatch {
            title: title.clone(),
            left: format!("{:?}", numerator.shape()),
            right: format!("{:?}", denominator.shape()),
        });
    }
    Ok(numerator / denominator)
}
