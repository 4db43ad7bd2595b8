//! Epoched time-series batches handed to leaf estimators.
//!
//! The core never looks inside a batch; it only carries it to estimators and records the
//! channel description alongside fitted markers.

use ndarray::{Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::MarkerError;

/// Description of the channels a batch was recorded from.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChannelInfo {
    /// Channel names, one per channel row of the batch
    pub ch_names: Vec<String>,
    /// Sampling frequency in Hz
    pub sfreq: f64,
}

/// An ordered collection of equal-shaped trials: `(epochs, channels, times)`.
#[derive(Clone, Debug)]
pub struct EpochBatch {
    data: Array3<f64>,
    info: ChannelInfo,
}

impl EpochBatch {
    /// Return a new EpochBatch.
    ///
    /// Fails if the number of channel names does not match the channel dimension.
    pub fn new(data: Array3<f64>, info: ChannelInfo) -> Result<Self, MarkerError> {
        let n_channels = data.len_of(Axis(1));
        if info.ch_names.len() != n_channels {
            return Err(MarkerError::InvalidAxisMap {
                title: None,
                reason: format!(
                    "batch has {} channels but {} channel names",
                    n_channels,
                    info.ch_names.len()
                ),
            });
        }
        Ok(EpochBatch { data, info })
    }

    pub fn data(&self) -> ArrayView3<f64> {
        self.data.view()
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn n_epochs(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_channels(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn n_times(&self) -> usize {
        self.data.len_of(Axis(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(n: usize) -> ChannelInfo {
        ChannelInfo {
            ch_names: (0..n).map(|i| format!("E{}", i + 1)).collect(),
            sfreq: 250.0,
        }
    }

    #[test]
    fn dimensions() {
        let batch = EpochBatch::new(Array3::zeros((4, 3, 10)), info(3)).unwrap();
        assert_eq!(4, batch.n_epochs());
        assert_eq!(3, batch.n_channels());
        assert_eq!(10, batch.n_times());
        assert_eq!("E2", batch.info().ch_names[1]);
    }

    #[test]
    fn channel_name_mismatch() {
        assert!(EpochBatch::new(Array3::zeros((4, 3, 10)), info(2)).is_err());
    }
}
