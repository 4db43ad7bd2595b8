//! A marker whose data is the elementwise quotient of two markers.

use ndarray::ArrayD;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use validator::Validate;

use crate::axis_map::AxisMap;
use crate::batch::EpochBatch;
use crate::error::MarkerError;
use crate::marker::{read_lock, write_lock, Attributes, Dependency, Marker, MarkerRef};
use crate::models::ReductionRequest;
use crate::persistence::{Dependencies, MarkerRecord};
use crate::reduction;
use crate::title::Title;

const NUMERATOR: &str = "numerator";
const DENOMINATOR: &str = "denominator";

/// Title, axis map and data shape of a fitted operand.
struct FittedOperand {
    title: Title,
    axis_map: Arc<AxisMap>,
    shape: Vec<usize>,
}

/// Describe `operand` if it is fitted.
fn fitted_operand(operand: &MarkerRef) -> Result<Option<FittedOperand>, MarkerError> {
    let operand = read_lock(operand)?;
    if !operand.is_fit()? {
        return Ok(None);
    }
    Ok(Some(FittedOperand {
        title: operand.title().clone(),
        axis_map: operand.axis_map()?,
        shape: operand.data()?.shape().to_vec(),
    }))
}

/// Ratio of two markers with compatible axis maps.
///
/// The quotient is computed from the operands' current data on every access and never cached.
#[derive(Debug)]
pub struct RatioMarker {
    title: Title,
    numerator: MarkerRef,
    denominator: MarkerRef,
}

impl RatioMarker {
    pub const CLASS_NAME: &'static str = "RatioMarker";

    /// Return a new RatioMarker.
    ///
    /// Fails with [MarkerError::ShapeMismatch] if both operands are fitted and their axis maps
    /// or data shapes differ.
    ///
    /// # Arguments
    ///
    /// * `numerator`: Dividend marker
    /// * `denominator`: Divisor marker
    /// * `comment`: Comment distinguishing ratios of the same class
    pub fn new(
        numerator: MarkerRef,
        denominator: MarkerRef,
        comment: &str,
    ) -> Result<Self, MarkerError> {
        let marker = RatioMarker {
            title: Title::marker(Self::CLASS_NAME, comment)?,
            numerator,
            denominator,
        };
        marker.check()?;
        Ok(marker)
    }

    /// Check that the operands' axis maps are compatible and their data shapes equal.
    ///
    /// Operands that are not fitted yet have no axis map, and pass.
    pub fn check(&self) -> Result<(), MarkerError> {
        let (Some(numerator), Some(denominator)) = (
            fitted_operand(&self.numerator)?,
            fitted_operand(&self.denominator)?,
        ) else {
            return Ok(());
        };
        if !numerator.axis_map.is_compatible(&denominator.axis_map) {
            return Err(MarkerError::ShapeMismatch {
                title: self.title.clone(),
                left: format!("{} {}", numerator.title, numerator.axis_map),
                right: format!("{} {}", denominator.title, denominator.axis_map),
            });
        }
        if numerator.shape != denominator.shape {
            return Err(MarkerError::ShapeMismatch {
                title: self.title.clone(),
                left: format!("{} {:?}", numerator.title, numerator.shape),
                right: format!("{} {:?}", denominator.title, denominator.shape),
            });
        }
        Ok(())
    }

    pub fn numerator(&self) -> &MarkerRef {
        &self.numerator
    }

    pub fn denominator(&self) -> &MarkerRef {
        &self.denominator
    }

    /// Rebuild a ratio marker from its record and its resolved operands.
    pub fn from_record(
        record: &MarkerRecord,
        resolved: &Dependencies,
    ) -> Result<Self, MarkerError> {
        Self::new(
            record.dependency(NUMERATOR, resolved)?,
            record.dependency(DENOMINATOR, resolved)?,
            record.title.comment(),
        )
    }

    /// Fit an operand if it is not fitted yet.
    fn fit_operand(
        &self,
        role: &str,
        operand: &MarkerRef,
        batch: &EpochBatch,
    ) -> Result<(), MarkerError> {
        let mut operand = write_lock(operand)?;
        if !operand.is_fit()? {
            warn!(
                operand = %operand.title(),
                "fitting {} of {}; fit upstream markers first", role, self.title
            );
            operand.fit(batch)?;
        }
        Ok(())
    }
}

impl Marker for RatioMarker {
    fn title(&self) -> &Title {
        &self.title
    }

    fn is_fit(&self) -> Result<bool, MarkerError> {
        let numerator = read_lock(&self.numerator)?.is_fit()?;
        let denominator = read_lock(&self.denominator)?.is_fit()?;
        Ok(numerator && denominator)
    }

    #[tracing::instrument(level = "DEBUG", skip(self, batch), fields(title = %self.title))]
    fn fit(&mut self, batch: &EpochBatch) -> Result<(), MarkerError> {
        self.fit_operand(NUMERATOR, &self.numerator, batch)?;
        self.fit_operand(DENOMINATOR, &self.denominator, batch)?;
        self.check()
    }

    fn axis_map(&self) -> Result<Arc<AxisMap>, MarkerError> {
        read_lock(&self.numerator)?.axis_map()
    }

    fn data(&self) -> Result<Arc<ArrayD<f64>>, MarkerError> {
        let numerator = read_lock(&self.numerator)?.data()?;
        let denominator = read_lock(&self.denominator)?.data()?;
        Ok(Arc::new(reduction::divide(
            &self.title,
            &numerator,
            &denominator,
        )?))
    }

    fn record(&self) -> Result<MarkerRecord, MarkerError> {
        MarkerRecord::new(self.title.clone(), Value::Object(Attributes::new()))
            .with_dependency(NUMERATOR, &self.numerator)?
            .with_dependency(DENOMINATOR, &self.denominator)
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![
            Dependency::new(NUMERATOR, self.numerator.clone()),
            Dependency::new(DENOMINATOR, self.denominator.clone()),
        ]
    }

    /// Reduce the ratio, distributing the steps that precede channels and epochs over the
    /// numerator and denominator.
    fn reduce(&self, request: &ReductionRequest) -> Result<ArrayD<f64>, MarkerError> {
        request.validate()?;
        self.check()?;
        let numerator = read_lock(&self.numerator)?.data()?;
        let denominator = read_lock(&self.denominator)?.data()?;
        let axis_map = self.axis_map()?;
        reduction::reduce_composite(
            &self.title,
            numerator.view(),
            denominator.view(),
            &axis_map,
            request,
            |left, right| reduction::divide(&self.title, &left, &right),
        )
    }
}
