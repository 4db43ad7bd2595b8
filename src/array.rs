//! Functions and utilities for working with [ndarray] objects.

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::axis_map::AxisMap;
use crate::error::MarkerError;
use crate::models::Picks;
use crate::title::Title;

const F64_SIZE: usize = std::mem::size_of::<f64>();

/// Apply per-axis picks to `data`, skipping axes that are preserved by the target.
///
/// Returns an owned copy of the selected data.
///
/// # Arguments
///
/// * `title`: Title of the marker the data belongs to, for error reporting
/// * `data`: Array governed by `axis_map`
/// * `axis_map`: Axis map of `data`
/// * `picks`: Optional index subsets keyed by axis name
/// * `preserved`: Axes left untouched by picks
pub fn apply_picks(
    title: &Title,
    data: ArrayViewD<f64>,
    axis_map: &AxisMap,
    picks: Option<&Picks>,
    preserved: &[&str],
) -> Result<ArrayD<f64>, MarkerError> {
    let mut data = data.to_owned();
    let Some(picks) = picks else {
        return Ok(data);
    };
    for (axis, indices) in picks {
        if preserved.contains(&axis.as_str()) {
            continue;
        }
        let index = axis_map
            .index_of(axis)
            .ok_or_else(|| MarkerError::InvalidReductionSpec {
                title: title.clone(),
                reason: format!("cannot pick along {}: axis not in {}", axis, axis_map),
            })?;
        let length = data.len_of(Axis(index));
        if let Some(bad) = indices.iter().find(|i| **i >= length) {
            return Err(MarkerError::InvalidReductionSpec {
                title: title.clone(),
                reason: format!(
                    "pick {} is out of range for axis {} of length {}",
                    bad, axis, length
                ),
            });
        }
        data = data.select(Axis(index), indices);
    }
    Ok(data)
}

/// Array data as persisted in a marker record.
///
/// Values are the little-endian bytes of each `f64` in logical (row-major) order, hex encoded,
/// so that NaN payloads and infinities survive a round trip unchanged.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoredArray {
    /// Shape of the array
    pub shape: Vec<usize>,
    /// Hex encoded little-endian values
    pub values: String,
}

impl StoredArray {
    /// Encode an array.
    pub fn from_array(array: &ArrayD<f64>) -> Self {
        let bytes: Vec<u8> = array.iter().flat_map(|value| value.to_le_bytes()).collect();
        StoredArray {
            shape: array.shape().to_vec(),
            values: hex::encode(bytes),
        }
    }

    /// Decode into an owned array.
    pub fn to_array(&self) -> Result<ArrayD<f64>, MarkerError> {
        let bytes = hex::decode(&self.values)?;
        if bytes.len() % F64_SIZE != 0 {
            return Err(MarkerError::FromBytes {
                type_name: std::any::type_name::<f64>(),
            });
        }
        let values: Vec<f64> = bytes
            .chunks_exact(F64_SIZE)
            .map(|chunk| {
                let mut raw = [0_u8; F64_SIZE];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), values)?)
    }
}
