use crate::axis_map::{AxisMap, CHANNELS, EPOCHS};
use crate::batch::{ChannelInfo, EpochBatch};
use crate::error::MarkerError;
use crate::marker::{
    shared, Attributes, Estimator, EstimatorOutput, LeafMarker, Marker, MarkerRef,
};
use crate::store::{MemoryStore, Store};
use crate::title::Title;

use bytes::Bytes;
use hashbrown::HashMap;
use ndarray::{Array3, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// Create an EpochBatch of 4 epochs, 3 channels and 10 samples.
pub(crate) fn get_test_batch() -> EpochBatch {
    let data = Array3::from_shape_fn((4, 3, 10), |(e, c, t)| {
        ((e * 3 + c) as f64 * 0.5 + t as f64).sin()
    });
    let info = ChannelInfo {
        ch_names: vec!["Fz".to_string(), "Cz".to_string(), "Pz".to_string()],
        sfreq: 250.0,
    };
    EpochBatch::new(data, info).unwrap()
}

/// Estimator producing deterministic data of a configured shape.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub(crate) struct FixedEstimator {
    axes: Vec<String>,
    shape: Vec<usize>,
    #[serde(default)]
    constant: Option<f64>,
}

impl FixedEstimator {
    pub(crate) fn new(axes: &[&str], shape: &[usize]) -> Self {
        FixedEstimator {
            axes: axes.iter().map(|axis| axis.to_string()).collect(),
            shape: shape.to_vec(),
            constant: None,
        }
    }

    /// Spectrum-like data of shape (epochs=4, channels=3, frequency=5).
    pub(crate) fn spectral() -> Self {
        Self::new(&[EPOCHS, CHANNELS, "frequency"], &[4, 3, 5])
    }

    /// Fill the data with `value`.
    pub(crate) fn with_constant(mut self, value: f64) -> Self {
        self.constant = Some(value);
        self
    }
}

/// Positive, irregular value for an index.
fn fixed_value(index: &[usize]) -> f64 {
    let hash = index
        .iter()
        .enumerate()
        .fold(17, |acc, (axis, i)| (acc * 31 + (i + 1) * (axis + 7)) % 1009);
    1.0 + hash as f64 / 64.0
}

impl Estimator for FixedEstimator {
    fn class_name(&self) -> &'static str {
        "FixedEstimator"
    }

    fn params(&self) -> Result<Value, MarkerError> {
        Ok(serde_json::to_value(self)?)
    }

    fn fit(&self, batch: &EpochBatch) -> Result<EstimatorOutput, MarkerError> {
        let data = match self.constant {
            Some(value) => ArrayD::from_elem(IxDyn(&self.shape), value),
            None => ArrayD::from_shape_fn(IxDyn(&self.shape), |index| fixed_value(index.slice())),
        };
        let mut attributes = Attributes::new();
        attributes.insert("n_epochs".to_string(), Value::from(batch.n_epochs()));
        attributes.insert("sfreq".to_string(), Value::from(batch.info().sfreq));
        Ok(EstimatorOutput {
            data,
            axis_map: AxisMap::from_names(self.axes.iter().map(String::as_str))?,
            attributes,
        })
    }
}

/// Create a shared leaf marker fitted to the test batch.
pub(crate) fn fitted_leaf(comment: &str) -> MarkerRef {
    let mut marker = LeafMarker::new(FixedEstimator::spectral(), comment).unwrap();
    marker.fit(&get_test_batch()).unwrap();
    shared(marker)
}

/// Memory store counting the writes to each title.
#[derive(Debug, Default)]
pub(crate) struct CountingStore {
    inner: MemoryStore,
    puts: Mutex<HashMap<Title, usize>>,
}

impl CountingStore {
    /// Number of times `title` has been written.
    pub(crate) fn puts(&self, title: &Title) -> usize {
        self.puts.lock().unwrap().get(title).copied().unwrap_or(0)
    }

    fn count(&self, title: &Title) {
        *self.puts.lock().unwrap().entry(title.clone()).or_insert(0) += 1;
    }
}

impl Store for CountingStore {
    fn put(&self, title: &Title, blob: Bytes) -> Result<(), MarkerError> {
        self.count(title);
        self.inner.put(title, blob)
    }

    fn get(&self, title: &Title) -> Result<Option<Bytes>, MarkerError> {
        self.inner.get(title)
    }

    fn exists(&self, title: &Title) -> Result<bool, MarkerError> {
        self.inner.exists(title)
    }

    fn titles(&self) -> Result<Vec<Title>, MarkerError> {
        self.inner.titles()
    }

    fn put_all(&self, entries: Vec<(Title, Bytes)>) -> Result<(), MarkerError> {
        for (title, _) in &entries {
            self.count(title);
        }
        self.inner.put_all(entries)
    }
}
