//! Markers: named feature extractors whose fitted data can be reduced to a target shape.
//!
//! A [Marker] is either a [LeafMarker], which wraps an [Estimator] that turns an [EpochBatch]
//! into an array, or a composite marker (see [crate::meta]) whose data is derived from the
//! markers it depends on. Composite markers hold their dependencies as shared [MarkerRef]s so
//! that one upstream marker can feed several composites.

use ndarray::ArrayD;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use validator::Validate;

use crate::array::StoredArray;
use crate::axis_map::AxisMap;
use crate::batch::{ChannelInfo, EpochBatch};
use crate::error::MarkerError;
use crate::models::{Picks, ReductionRequest, ReductionStep, Target};
use crate::persistence::MarkerRecord;
use crate::reduction;
use crate::title::Title;

/// Shared, lockable reference to a marker of any class.
pub type MarkerRef = Arc<RwLock<dyn Marker>>;

/// Estimator-specific attributes derived during fit.
pub type Attributes = serde_json::Map<String, Value>;

/// Wrap a marker in a [MarkerRef].
pub fn shared<M: Marker + 'static>(marker: M) -> MarkerRef {
    Arc::new(RwLock::new(marker))
}

/// Acquire a read lock on a shared marker.
pub(crate) fn read_lock(
    marker: &MarkerRef,
) -> Result<RwLockReadGuard<'_, dyn Marker + 'static>, MarkerError> {
    marker.read().map_err(|poisoned| MarkerError::LockPoisoned {
        what: format!("marker {}", poisoned.get_ref().title()),
    })
}

/// Acquire a write lock on a shared marker.
pub(crate) fn write_lock(
    marker: &MarkerRef,
) -> Result<RwLockWriteGuard<'_, dyn Marker + 'static>, MarkerError> {
    marker.write().map_err(|poisoned| MarkerError::LockPoisoned {
        what: format!("marker {}", poisoned.get_ref().title()),
    })
}

/// Fit state of a marker.
///
/// A marker starts [FitState::Unfit], holding only its configuration. Fitting replaces the
/// whole [FitState::Fitted] payload, so a re-fit never mixes state from two batches.
#[derive(Clone, Debug, Default)]
pub enum FitState<F> {
    #[default]
    Unfit,
    Fitted(F),
}

impl<F> FitState<F> {
    pub fn is_fit(&self) -> bool {
        matches!(self, FitState::Fitted(_))
    }

    /// Returns the fitted payload, or [MarkerError::NotFitted].
    pub fn fitted(&self, title: &Title) -> Result<&F, MarkerError> {
        match self {
            FitState::Fitted(fitted) => Ok(fitted),
            FitState::Unfit => Err(MarkerError::NotFitted {
                title: title.clone(),
            }),
        }
    }

    /// Replace the state with a new fitted payload.
    pub fn replace(&mut self, fitted: F) {
        *self = FitState::Fitted(fitted);
    }
}

/// Output of an [Estimator] fit.
#[derive(Clone, Debug)]
pub struct EstimatorOutput {
    /// Fitted data, one dimension per axis of `axis_map`
    pub data: ArrayD<f64>,
    /// Axis map describing `data`
    pub axis_map: AxisMap,
    /// Estimator-specific derived attributes
    pub attributes: Attributes,
}

/// Capability of computing a marker's data from a batch.
///
/// Estimators own their configuration. The configuration returned by [Estimator::params] is
/// persisted in the marker record and must deserialise back into the estimator.
pub trait Estimator: Debug + Send + Sync {
    /// Class name of the estimator, which is also the class component of its marker's title.
    fn class_name(&self) -> &'static str;

    /// Configuration of the estimator.
    fn params(&self) -> Result<Value, MarkerError>;

    /// Compute the data of a batch.
    fn fit(&self, batch: &EpochBatch) -> Result<EstimatorOutput, MarkerError>;
}

/// A named upstream marker of a composite.
#[derive(Clone, Debug)]
pub struct Dependency {
    /// Role of the dependency, e.g. `parent` or `numerator`
    pub role: &'static str,
    pub marker: MarkerRef,
}

impl Dependency {
    pub fn new(role: &'static str, marker: MarkerRef) -> Self {
        Dependency { role, marker }
    }
}

/// A feature extractor whose fitted data can be reduced and persisted.
pub trait Marker: Debug + Send + Sync {
    /// Title identifying the marker's class and configuration.
    fn title(&self) -> &Title;

    /// Whether the marker, and every marker it depends on, is fitted.
    fn is_fit(&self) -> Result<bool, MarkerError>;

    /// Fit the marker to a batch.
    fn fit(&mut self, batch: &EpochBatch) -> Result<(), MarkerError>;

    /// Axis map of the fitted data.
    fn axis_map(&self) -> Result<Arc<AxisMap>, MarkerError>;

    /// Fitted data.
    fn data(&self) -> Result<Arc<ArrayD<f64>>, MarkerError>;

    /// Record of the marker's configuration and state, as persisted.
    fn record(&self) -> Result<MarkerRecord, MarkerError>;

    /// Upstream markers this marker is derived from.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Reduce the fitted data according to `request`.
    fn reduce(&self, request: &ReductionRequest) -> Result<ArrayD<f64>, MarkerError> {
        request.validate()?;
        let data = self.data()?;
        let axis_map = self.axis_map()?;
        reduction::reduce(self.title(), data.view(), &axis_map, request)
    }

    /// Reduce the fitted data to a single value.
    fn reduce_to_scalar(
        &self,
        reduction: Option<Vec<ReductionStep>>,
        picks: Option<Picks>,
    ) -> Result<f64, MarkerError> {
        let request = ReductionRequest {
            reduction,
            target: Target::Scalar,
            picks,
        };
        let result = self.reduce(&request)?;
        result
            .first()
            .copied()
            .ok_or_else(|| MarkerError::InvalidReductionSpec {
                title: self.title().clone(),
                reason: "reduction to scalar produced no value".to_string(),
            })
    }

    /// Reduce the fitted data to one value per channel.
    fn reduce_to_topo(
        &self,
        reduction: Option<Vec<ReductionStep>>,
        picks: Option<Picks>,
    ) -> Result<ArrayD<f64>, MarkerError> {
        self.reduce(&ReductionRequest {
            reduction,
            target: Target::Topography,
            picks,
        })
    }

    /// Reduce the fitted data to one value per epoch.
    fn reduce_to_epochs(
        &self,
        reduction: Option<Vec<ReductionStep>>,
        picks: Option<Picks>,
    ) -> Result<ArrayD<f64>, MarkerError> {
        self.reduce(&ReductionRequest {
            reduction,
            target: Target::Epochs,
            picks,
        })
    }
}

/// Fitted state of a [LeafMarker].
#[derive(Clone, Debug)]
pub struct LeafState {
    pub data: Arc<ArrayD<f64>>,
    pub axis_map: Arc<AxisMap>,
    pub attributes: Attributes,
    pub channel_info: ChannelInfo,
}

impl LeafState {
    /// Return a new LeafState, checking that the data rank matches the axis map.
    pub fn new(
        title: &Title,
        data: ArrayD<f64>,
        axis_map: AxisMap,
        attributes: Attributes,
        channel_info: ChannelInfo,
    ) -> Result<Self, MarkerError> {
        if data.ndim() != axis_map.len() {
            return Err(MarkerError::InvalidAxisMap {
                title: Some(title.clone()),
                reason: format!(
                    "estimator produced {} dimensions but axis map {} has {} axes",
                    data.ndim(),
                    axis_map,
                    axis_map.len()
                ),
            });
        }
        Ok(LeafState {
            data: Arc::new(data),
            axis_map: Arc::new(axis_map),
            attributes,
            channel_info,
        })
    }
}

/// A marker computed directly from a batch by an [Estimator].
#[derive(Debug)]
pub struct LeafMarker {
    title: Title,
    estimator: Box<dyn Estimator>,
    state: FitState<LeafState>,
}

impl LeafMarker {
    /// Return a new unfitted LeafMarker.
    ///
    /// # Arguments
    ///
    /// * `estimator`: Estimator computing the marker's data
    /// * `comment`: Comment distinguishing configurations of the same class
    pub fn new<E: Estimator + 'static>(estimator: E, comment: &str) -> Result<Self, MarkerError> {
        Self::from_boxed(Box::new(estimator), comment)
    }

    /// Return a new unfitted LeafMarker from a boxed estimator.
    pub fn from_boxed(estimator: Box<dyn Estimator>, comment: &str) -> Result<Self, MarkerError> {
        let title = Title::marker(estimator.class_name(), comment)?;
        Ok(LeafMarker {
            title,
            estimator,
            state: FitState::Unfit,
        })
    }

    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }

    pub fn state(&self) -> &FitState<LeafState> {
        &self.state
    }

    /// Restore a previously fitted state.
    pub fn restore(&mut self, state: LeafState) {
        self.state.replace(state);
    }

    /// Rebuild a leaf marker from its persisted record.
    ///
    /// The estimator is deserialised from the record's parameters. When the record carries
    /// data, the fitted state is restored as well.
    pub fn from_record<E>(record: &MarkerRecord) -> Result<Self, MarkerError>
    where
        E: Estimator + DeserializeOwned + 'static,
    {
        let estimator: E = serde_json::from_value(record.params.clone())?;
        if estimator.class_name() != record.title.class_name() {
            return Err(MarkerError::InvalidRecord {
                title: record.title.to_string(),
                reason: format!("params describe a {}", estimator.class_name()),
            });
        }
        let mut marker = Self::new(estimator, record.title.comment())?;
        match (&record.data, &record.axis_map, &record.channel_info) {
            (None, None, None) => {}
            (Some(data), Some(axis_map), Some(channel_info)) => {
                let state = LeafState::new(
                    &record.title,
                    data.to_array()?,
                    axis_map.clone(),
                    record.attributes.clone(),
                    channel_info.clone(),
                )?;
                marker.restore(state);
            }
            _ => {
                return Err(MarkerError::InvalidRecord {
                    title: record.title.to_string(),
                    reason: "data, axis map and channel info must be stored together".to_string(),
                })
            }
        }
        Ok(marker)
    }
}

impl Marker for LeafMarker {
    fn title(&self) -> &Title {
        &self.title
    }

    fn is_fit(&self) -> Result<bool, MarkerError> {
        Ok(self.state.is_fit())
    }

    #[tracing::instrument(level = "DEBUG", skip(self, batch), fields(title = %self.title))]
    fn fit(&mut self, batch: &EpochBatch) -> Result<(), MarkerError> {
        let output = self
            .estimator
            .fit(batch)
            .map_err(|err| err.in_marker(&self.title))?;
        let state = LeafState::new(
            &self.title,
            output.data,
            output.axis_map,
            output.attributes,
            batch.info().clone(),
        )?;
        debug!(shape = ?state.data.shape(), axis_map = %state.axis_map, "fitted leaf marker");
        self.state.replace(state);
        Ok(())
    }

    fn axis_map(&self) -> Result<Arc<AxisMap>, MarkerError> {
        Ok(self.state.fitted(&self.title)?.axis_map.clone())
    }

    fn data(&self) -> Result<Arc<ArrayD<f64>>, MarkerError> {
        Ok(self.state.fitted(&self.title)?.data.clone())
    }

    fn record(&self) -> Result<MarkerRecord, MarkerError> {
        let mut record = MarkerRecord::new(self.title.clone(), self.estimator.params()?);
        if let FitState::Fitted(state) = &self.state {
            record.attributes = state.attributes.clone();
            record.axis_map = Some(state.axis_map.as_ref().clone());
            record.data = Some(StoredArray::from_array(&state.data));
            record.channel_info = Some(state.channel_info.clone());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::axis_map::{CHANNELS, EPOCHS};
    use crate::models::Aggregation;
    use crate::test_utils::{get_test_batch, FixedEstimator};

    fn fitted() -> LeafMarker {
        let mut marker = LeafMarker::new(FixedEstimator::spectral(), "alpha").unwrap();
        marker.fit(&get_test_batch()).unwrap();
        marker
    }

    #[test]
    fn title_from_estimator() {
        let marker = LeafMarker::new(FixedEstimator::spectral(), "alpha").unwrap();
        assert_eq!(
            "marker_graph/marker/FixedEstimator/alpha",
            marker.title().to_string()
        );
    }

    #[test]
    fn unfit_data() {
        let marker = LeafMarker::new(FixedEstimator::spectral(), "alpha").unwrap();
        assert!(!marker.is_fit().unwrap());
        match marker.data().unwrap_err() {
            MarkerError::NotFitted { title } => assert_eq!(marker.title(), &title),
            err => panic!("unexpected error {}", err),
        }
        assert!(marker.axis_map().is_err());
    }

    #[test]
    fn fit_stores_state() {
        let marker = fitted();
        assert!(marker.is_fit().unwrap());
        assert_eq!(&[4, 3, 5], marker.data().unwrap().shape());
        assert_eq!(Some(1), marker.axis_map().unwrap().index_of(CHANNELS));
        let FitState::Fitted(state) = marker.state() else {
            panic!("marker not fitted");
        };
        assert_eq!(3, state.channel_info.ch_names.len());
        assert_eq!(Some(&Value::from(4)), state.attributes.get("n_epochs"));
    }

    #[test]
    fn refit_replaces_state() {
        let mut marker = fitted();
        let before = marker.data().unwrap();
        marker.fit(&get_test_batch()).unwrap();
        let after = marker.data().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before, after);
    }

    #[test]
    fn rank_mismatch() {
        let estimator = FixedEstimator::new(&[EPOCHS, CHANNELS], &[4, 3, 5]);
        let mut marker = LeafMarker::new(estimator, "bad").unwrap();
        match marker.fit(&get_test_batch()).unwrap_err() {
            MarkerError::InvalidAxisMap { title, .. } => {
                assert_eq!(Some(marker.title()), title.as_ref())
            }
            err => panic!("unexpected error {}", err),
        }
        assert!(!marker.is_fit().unwrap());
    }

    #[test]
    fn reduce_to_scalar() {
        let marker = fitted();
        let data = marker.data().unwrap();
        let expected = data.mean().unwrap();
        let value = marker.reduce_to_scalar(None, None).unwrap();
        assert!((expected - value).abs() < 1e-12);
    }

    #[test]
    fn reduce_to_topo_and_epochs() {
        let marker = fitted();
        let reduction = vec![
            ReductionStep::new("frequency", Aggregation::Max),
            ReductionStep::new(EPOCHS, Aggregation::Median),
            ReductionStep::new(CHANNELS, Aggregation::Mean),
        ];
        let topo = marker.reduce_to_topo(Some(reduction.clone()), None).unwrap();
        assert_eq!(&[3], topo.shape());
        let epochs = marker.reduce_to_epochs(Some(reduction), None).unwrap();
        assert_eq!(&[4], epochs.shape());
    }

    #[test]
    fn reduce_invalid_request() {
        let marker = fitted();
        let picks = Picks::from([(CHANNELS.to_string(), vec![])]);
        assert!(matches!(
            marker.reduce_to_scalar(None, Some(picks)).unwrap_err(),
            MarkerError::RequestValidation(_)
        ));
    }

    #[test]
    fn record_of_fitted_leaf() {
        let marker = fitted();
        let record = marker.record().unwrap();
        assert_eq!(marker.title(), &record.title);
        assert!(record.dependencies.is_empty());
        assert_eq!(Some(vec![4, 3, 5]), record.data.map(|data| data.shape));
        assert!(record.channel_info.is_some());
    }

    #[test]
    fn record_round_trip() {
        let marker = fitted();
        let record = marker.record().unwrap();
        let restored = LeafMarker::from_record::<FixedEstimator>(&record).unwrap();
        assert_eq!(marker.title(), restored.title());
        assert_eq!(marker.data().unwrap(), restored.data().unwrap());
        assert_eq!(marker.axis_map().unwrap(), restored.axis_map().unwrap());
        assert_eq!(
            marker.estimator().params().unwrap(),
            restored.estimator().params().unwrap()
        );
    }

    #[test]
    fn record_of_unfit_leaf() {
        let marker = LeafMarker::new(FixedEstimator::spectral(), "alpha").unwrap();
        let record = marker.record().unwrap();
        assert!(record.data.is_none());
        let restored = LeafMarker::from_record::<FixedEstimator>(&record).unwrap();
        assert!(!restored.is_fit().unwrap());
    }

    #[test]
    fn record_with_partial_state() {
        let mut record = fitted().record().unwrap();
        record.channel_info = None;
        assert!(matches!(
            LeafMarker::from_record::<FixedEstimator>(&record).unwrap_err(),
            MarkerError::InvalidRecord { .. }
        ));
    }
}
