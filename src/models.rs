//! Reduction request types and their validation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::axis_map::{CHANNELS, EPOCHS};

/// Aggregation functions that collapse one axis of an array
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Aggregation {
    /// Arithmetic mean
    Mean,
    /// Median, averaging the two central values for even lengths
    Median,
    /// Sum
    Sum,
    /// Maximum
    Max,
    /// Minimum
    Min,
    /// Population standard deviation
    Std,
    /// Population variance
    Var,
}

/// A single step of a reduction: aggregate `axis` with `function`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReductionStep {
    /// Name of the axis to collapse
    pub axis: String,
    /// Aggregation applied along the axis
    pub function: Aggregation,
}

impl ReductionStep {
    /// Return a new ReductionStep.
    pub fn new(axis: impl Into<String>, function: Aggregation) -> Self {
        ReductionStep {
            axis: axis.into(),
            function,
        }
    }
}

/// Output-shape class of a reduction
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Target {
    /// Reduce every axis to a single value
    #[default]
    Scalar,
    /// Keep one value per channel
    Topography,
    /// Keep one value per epoch
    Epochs,
}

impl Target {
    /// Axes that survive a reduction to this target.
    pub fn preserved_axes(self) -> &'static [&'static str] {
        match self {
            Self::Scalar => &[],
            Self::Topography => &[CHANNELS],
            Self::Epochs => &[EPOCHS],
        }
    }
}

/// Per-axis index subsets applied before reducing.
pub type Picks = BTreeMap<String, Vec<usize>>;

/// A request to reduce a fitted marker to a target shape
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_reduction_request"))]
pub struct ReductionRequest {
    /// Ordered reduction steps. When absent every non-preserved axis is averaged in axis map
    /// order.
    #[serde(default)]
    pub reduction: Option<Vec<ReductionStep>>,
    /// Target shape
    pub target: Target,
    /// Optional index subsets per axis
    #[serde(default)]
    #[validate(custom = "validate_picks")]
    pub picks: Option<Picks>,
}

impl ReductionRequest {
    /// Return a ReductionRequest with default reduction and no picks.
    pub fn new(target: Target) -> Self {
        ReductionRequest {
            reduction: None,
            target,
            picks: None,
        }
    }

    pub fn with_reduction(mut self, reduction: Vec<ReductionStep>) -> Self {
        self.reduction = Some(reduction);
        self
    }

    pub fn with_picks(mut self, picks: Picks) -> Self {
        self.picks = Some(picks);
        self
    }
}

/// Per-marker reduction parameters used when reducing a whole collection.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReductionParams {
    #[serde(default)]
    pub reduction: Option<Vec<ReductionStep>>,
    #[serde(default)]
    pub picks: Option<Picks>,
}

impl ReductionParams {
    /// Build the request for `target` from these parameters.
    pub fn request(&self, target: Target) -> ReductionRequest {
        ReductionRequest {
            reduction: self.reduction.clone(),
            target,
            picks: self.picks.clone(),
        }
    }
}

/// Validate picks
fn validate_picks(picks: &Picks) -> Result<(), ValidationError> {
    if let Some((axis, _)) = picks.iter().find(|(_, indices)| indices.is_empty()) {
        let mut error = ValidationError::new("picks must not be empty");
        error.add_param("axis".into(), axis);
        return Err(error);
    }
    Ok(())
}

/// Validate a reduction request
fn validate_reduction_request(request: &ReductionRequest) -> Result<(), ValidationError> {
    if let Some(reduction) = &request.reduction {
        for (n, step) in reduction.iter().enumerate() {
            if reduction[..n].iter().any(|other| other.axis == step.axis) {
                let mut error = ValidationError::new("reduction axes must be unique");
                error.add_param("axis".into(), &step.axis);
                return Err(error);
            }
        }
    }
    Ok(())
}
