//! Axis maps: the contract between data producers and the reduction engine.
//!
//! An [AxisMap] associates semantic axis names (`epochs`, `channels`, `frequency`, ...) with the
//! dimension of the marker's data array they describe.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MarkerError;

/// Name of the channel axis.
pub const CHANNELS: &str = "channels";

/// Name of the epoch axis.
pub const EPOCHS: &str = "epochs";

/// Ordered association of axis name to array dimension index.
///
/// Names are unique and the indices form a permutation of `0..len`. Iteration follows the order
/// the axes were given in.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Vec<(String, usize)>", into = "Vec<(String, usize)>")]
pub struct AxisMap {
    axes: Vec<(String, usize)>,
}

impl AxisMap {
    /// Return a new AxisMap from `(name, index)` pairs.
    pub fn new<I, S>(axes: I) -> Result<Self, MarkerError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let axes: Vec<(String, usize)> = axes
            .into_iter()
            .map(|(name, index)| (name.into(), index))
            .collect();
        let mut seen = vec![false; axes.len()];
        for (n, (name, index)) in axes.iter().enumerate() {
            if axes[..n].iter().any(|(other, _)| other == name) {
                return Err(MarkerError::InvalidAxisMap {
                    title: None,
                    reason: format!("duplicate axis {}", name),
                });
            }
            match seen.get_mut(*index) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(MarkerError::InvalidAxisMap {
                        title: None,
                        reason: format!(
                            "index {} of axis {} is repeated or out of range for {} axes",
                            index,
                            name,
                            axes.len()
                        ),
                    })
                }
            }
        }
        Ok(AxisMap { axes })
    }

    /// Return a new AxisMap whose indices follow the order of `names`.
    pub fn from_names<I, S>(names: I) -> Result<Self, MarkerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .enumerate()
                .map(|(index, name)| (name, index)),
        )
    }

    /// Number of axes, which is also the rank of the governed array.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Dimension index of `axis`, if present.
    pub fn index_of(&self, axis: &str) -> Option<usize> {
        self.axes
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, index)| *index)
    }

    pub fn contains(&self, axis: &str) -> bool {
        self.index_of(axis).is_some()
    }

    /// Iterate over `(name, index)` pairs in map order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.axes.iter().map(|(name, index)| (name.as_str(), *index))
    }

    /// Axis names in map order.
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|(name, _)| name).collect()
    }

    /// Two maps are compatible when they assign the same indices to the same names.
    pub fn is_compatible(&self, other: &AxisMap) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, index)| other.index_of(name) == Some(index))
    }
}

impl fmt::Display for AxisMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (n, (name, index)) in self.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, index)?;
        }
        write!(f, "}}")
    }
}

impl TryFrom<Vec<(String, usize)>> for AxisMap {
    type Error = MarkerError;

    fn try_from(axes: Vec<(String, usize)>) -> Result<Self, Self::Error> {
        Self::new(axes)
    }
}

impl From<AxisMap> for Vec<(String, usize)> {
    fn from(axis_map: AxisMap) -> Self {
        axis_map.axes
    }
}
