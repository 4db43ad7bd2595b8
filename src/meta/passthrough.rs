//! A marker that exposes its parent's data under its own title.

use ndarray::ArrayD;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::axis_map::AxisMap;
use crate::batch::EpochBatch;
use crate::error::MarkerError;
use crate::marker::{read_lock, write_lock, Attributes, Dependency, Marker, MarkerRef};
use crate::models::ReductionRequest;
use crate::persistence::{Dependencies, MarkerRecord};
use crate::title::Title;

const PARENT: &str = "parent";

/// Passes its parent's data and reductions through unchanged.
///
/// Used to register an upstream marker a second time, under a different comment.
#[derive(Debug)]
pub struct PassthroughMarker {
    title: Title,
    parent: MarkerRef,
}

impl PassthroughMarker {
    pub const CLASS_NAME: &'static str = "PassthroughMarker";

    /// Return a new PassthroughMarker of `parent`.
    pub fn new(parent: MarkerRef, comment: &str) -> Result<Self, MarkerError> {
        let marker = PassthroughMarker {
            title: Title::marker(Self::CLASS_NAME, comment)?,
            parent,
        };
        marker.check()?;
        Ok(marker)
    }

    /// Consistency check of the parent. Any parent is accepted.
    pub fn check(&self) -> Result<(), MarkerError> {
        Ok(())
    }

    pub fn parent(&self) -> &MarkerRef {
        &self.parent
    }

    /// Rebuild a passthrough marker from its record and its resolved parent.
    pub fn from_record(
        record: &MarkerRecord,
        resolved: &Dependencies,
    ) -> Result<Self, MarkerError> {
        Self::new(record.dependency(PARENT, resolved)?, record.title.comment())
    }
}

impl Marker for PassthroughMarker {
    fn title(&self) -> &Title {
        &self.title
    }

    fn is_fit(&self) -> Result<bool, MarkerError> {
        read_lock(&self.parent)?.is_fit()
    }

    #[tracing::instrument(level = "DEBUG", skip(self, batch), fields(title = %self.title))]
    fn fit(&mut self, batch: &EpochBatch) -> Result<(), MarkerError> {
        self.check()?;
        let mut parent = write_lock(&self.parent)?;
        if !parent.is_fit()? {
            warn!(
                parent = %parent.title(),
                "fitting parent of {}; fit upstream markers first", self.title
            );
            parent.fit(batch)?;
        }
        Ok(())
    }

    fn axis_map(&self) -> Result<Arc<AxisMap>, MarkerError> {
        read_lock(&self.parent)?.axis_map()
    }

    fn data(&self) -> Result<Arc<ArrayD<f64>>, MarkerError> {
        read_lock(&self.parent)?.data()
    }

    fn record(&self) -> Result<MarkerRecord, MarkerError> {
        MarkerRecord::new(self.title.clone(), Value::Object(Attributes::new()))
            .with_dependency(PARENT, &self.parent)
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(PARENT, self.parent.clone())]
    }

    fn reduce(&self, request: &ReductionRequest) -> Result<ArrayD<f64>, MarkerError> {
        read_lock(&self.parent)?.reduce(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::axis_map::{CHANNELS, EPOCHS};
    use crate::marker::{shared, LeafMarker};
    use crate::models::{Aggregation, Picks, ReductionStep, Target};
    use crate::test_utils::{fitted_leaf, get_test_batch, FixedEstimator};

    #[test]
    fn title() {
        let marker = PassthroughMarker::new(fitted_leaf("alpha"), "copy").unwrap();
        assert_eq!(
            "marker_graph/marker/PassthroughMarker/copy",
            marker.title().to_string()
        );
    }

    #[test]
    fn data_is_parent_data() {
        let leaf = fitted_leaf("alpha");
        let marker = PassthroughMarker::new(leaf.clone(), "copy").unwrap();
        let parent_data = read_lock(&leaf).unwrap().data().unwrap();
        assert!(Arc::ptr_eq(&parent_data, &marker.data().unwrap()));
        assert!(Arc::ptr_eq(
            &read_lock(&leaf).unwrap().axis_map().unwrap(),
            &marker.axis_map().unwrap()
        ));
    }

    #[test]
    fn parent_refit_is_visible() {
        let leaf = fitted_leaf("alpha");
        let marker = PassthroughMarker::new(leaf.clone(), "copy").unwrap();
        let before = marker.data().unwrap();
        write_lock(&leaf).unwrap().fit(&get_test_batch()).unwrap();
        let after = marker.data().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(
            &read_lock(&leaf).unwrap().data().unwrap(),
            &after
        ));
    }

    #[test]
    fn fit_fits_unfit_parent() {
        let leaf = shared(LeafMarker::new(FixedEstimator::spectral(), "alpha").unwrap());
        let mut marker = PassthroughMarker::new(leaf.clone(), "copy").unwrap();
        assert!(!marker.is_fit().unwrap());
        assert!(matches!(
            marker.data().unwrap_err(),
            MarkerError::NotFitted { .. }
        ));
        marker.fit(&get_test_batch()).unwrap();
        assert!(marker.is_fit().unwrap());
        assert!(read_lock(&leaf).unwrap().is_fit().unwrap());
    }

    #[test]
    fn fit_leaves_fitted_parent() {
        let leaf = fitted_leaf("alpha");
        let before = read_lock(&leaf).unwrap().data().unwrap();
        let mut marker = PassthroughMarker::new(leaf.clone(), "copy").unwrap();
        marker.fit(&get_test_batch()).unwrap();
        assert!(Arc::ptr_eq(&before, &marker.data().unwrap()));
    }

    #[test]
    fn two_passthroughs_reduce_identically() {
        let leaf = fitted_leaf("alpha");
        let first = PassthroughMarker::new(leaf.clone(), "first").unwrap();
        let second = PassthroughMarker::new(leaf.clone(), "second").unwrap();
        assert_ne!(first.title(), second.title());

        let request = ReductionRequest::new(Target::Topography)
            .with_reduction(vec![
                ReductionStep::new("frequency", Aggregation::Sum),
                ReductionStep::new(EPOCHS, Aggregation::Median),
            ])
            .with_picks(Picks::from([(EPOCHS.to_string(), vec![0, 2])]));
        let a = first.reduce(&request).unwrap();
        let b = second.reduce(&request).unwrap();
        assert_eq!(a, b);
        assert_eq!(read_lock(&leaf).unwrap().reduce(&request).unwrap(), a);
    }

    #[test]
    fn scalar_reduction_matches_parent() {
        let leaf = fitted_leaf("alpha");
        let marker = PassthroughMarker::new(leaf.clone(), "copy").unwrap();
        let picks = Picks::from([(CHANNELS.to_string(), vec![1])]);
        assert_eq!(
            read_lock(&leaf)
                .unwrap()
                .reduce_to_scalar(None, Some(picks.clone()))
                .unwrap()
                .to_bits(),
            marker.reduce_to_scalar(None, Some(picks)).unwrap().to_bits()
        );
    }

    #[test]
    fn record_references_parent() {
        let leaf = fitted_leaf("alpha");
        let marker = PassthroughMarker::new(leaf.clone(), "copy").unwrap();
        let record = marker.record().unwrap();
        assert!(record.data.is_none());
        assert_eq!(
            Some(read_lock(&leaf).unwrap().title()),
            record.dependencies.get(PARENT)
        );
    }
}
