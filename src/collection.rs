//! Ordered collections of markers fitted, saved and reduced together.

use hashbrown::HashMap;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::EpochBatch;
use crate::error::MarkerError;
use crate::marker::{read_lock, write_lock, Marker, MarkerRef};
use crate::models::{ReductionParams, Target};
use crate::persistence::{self, Dependencies, Registry, SavePlan};
use crate::store::Store;
use crate::title::{Kind, Title};

/// Index record of a saved collection.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
struct CollectionIndex {
    title: Title,
    /// Member titles in collection order
    members: Vec<Title>,
}

/// An ordered set of markers with distinct titles.
#[derive(Debug)]
pub struct MarkerCollection {
    title: Title,
    markers: Vec<MarkerRef>,
}

impl MarkerCollection {
    pub const CLASS_NAME: &'static str = "MarkerCollection";

    /// Return a new empty MarkerCollection.
    pub fn new(comment: &str) -> Result<Self, MarkerError> {
        Ok(MarkerCollection {
            title: Self::index_title(comment)?,
            markers: Vec::new(),
        })
    }

    fn index_title(comment: &str) -> Result<Title, MarkerError> {
        Title::new(Kind::Collection, Self::CLASS_NAME, comment)
    }

    /// Title of the collection's index record.
    pub fn title(&self) -> &Title {
        &self.title
    }

    /// Append a marker. A marker whose title is already in the collection is rejected.
    pub fn push(&mut self, marker: MarkerRef) -> Result<(), MarkerError> {
        let title = read_lock(&marker)?.title().clone();
        if self.get(&title)?.is_some() {
            return Err(MarkerError::TitleExists { title });
        }
        self.markers.push(marker);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Member titles in order.
    pub fn titles(&self) -> Result<Vec<Title>, MarkerError> {
        self.markers
            .iter()
            .map(|marker| Ok(read_lock(marker)?.title().clone()))
            .collect()
    }

    /// The member with title `title`, if any.
    pub fn get(&self, title: &Title) -> Result<Option<MarkerRef>, MarkerError> {
        for marker in &self.markers {
            if read_lock(marker)?.title() == title {
                return Ok(Some(marker.clone()));
            }
        }
        Ok(None)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerRef> {
        self.markers.iter()
    }

    /// Fit every member, in order.
    #[tracing::instrument(level = "DEBUG", skip(self, batch), fields(title = %self.title))]
    pub fn fit(&self, batch: &EpochBatch) -> Result<(), MarkerError> {
        for marker in &self.markers {
            let mut marker = write_lock(marker)?;
            info!(title = %marker.title(), "fitting marker");
            marker.fit(batch)?;
        }
        Ok(())
    }

    /// Save every member and the collection index in one commit.
    ///
    /// Returns the titles written.
    ///
    /// # Arguments
    ///
    /// * `store`: Destination store
    /// * `overwrite`: Whether existing records of the members and of the index may be replaced
    #[tracing::instrument(level = "DEBUG", skip(self, store), fields(title = %self.title))]
    pub fn save(&self, store: &dyn Store, overwrite: bool) -> Result<Vec<Title>, MarkerError> {
        if !overwrite && store.exists(&self.title)? {
            return Err(MarkerError::TitleExists {
                title: self.title.clone(),
            });
        }
        let mut plan = SavePlan::new(store, overwrite);
        for marker in &self.markers {
            plan.add(&*read_lock(marker)?)?;
        }
        let index = CollectionIndex {
            title: self.title.clone(),
            members: self.titles()?,
        };
        plan.schedule(self.title.clone(), serde_json::to_vec(&index)?.into());
        plan.commit()
    }

    /// Reduce every member to `target`.
    ///
    /// `params` holds the reduction parameters of each member keyed by
    /// [Title::short](crate::title::Title::short). Results are in collection order.
    pub fn reduce(
        &self,
        target: Target,
        params: &HashMap<String, ReductionParams>,
    ) -> Result<Vec<ArrayD<f64>>, MarkerError> {
        self.markers
            .iter()
            .map(|marker| {
                let marker = read_lock(marker)?;
                let key = marker.title().short();
                let params = params
                    .get(&key)
                    .ok_or_else(|| MarkerError::InvalidReductionSpec {
                        title: marker.title().clone(),
                        reason: format!("no reduction parameters for {}", key),
                    })?;
                marker.reduce(&params.request(target))
            })
            .collect()
    }

    /// Reduce every member to a single value.
    pub fn reduce_to_scalar(
        &self,
        params: &HashMap<String, ReductionParams>,
    ) -> Result<Vec<f64>, MarkerError> {
        let results = self.reduce(Target::Scalar, params)?;
        let mut values = Vec::with_capacity(results.len());
        for (marker, result) in self.markers.iter().zip(results) {
            let Some(value) = result.first() else {
                return Err(MarkerError::InvalidReductionSpec {
                    title: read_lock(marker)?.title().clone(),
                    reason: "reduction to scalar produced no value".to_string(),
                });
            };
            values.push(*value);
        }
        Ok(values)
    }
}

/// Read the collection saved under `comment`, reading its members transitively.
///
/// Members sharing upstream markers share the reconstructed instances.
///
/// # Arguments
///
/// * `store`: Store to read from
/// * `registry`: Constructors of the marker classes in the collection
/// * `comment`: Comment of the collection
#[tracing::instrument(level = "DEBUG", skip(store, registry))]
pub fn read_collection(
    store: &dyn Store,
    registry: &Registry,
    comment: &str,
) -> Result<MarkerCollection, MarkerError> {
    let title = MarkerCollection::index_title(comment)?;
    let blob = store.get(&title)?.ok_or_else(|| MarkerError::NotFound {
        title: title.clone(),
    })?;
    let index: CollectionIndex = serde_json::from_slice(&blob)?;
    if index.title != title {
        return Err(MarkerError::InvalidRecord {
            title: title.to_string(),
            reason: format!("record is titled {}", index.title),
        });
    }
    let mut resolved = Dependencies::new();
    let mut collection = MarkerCollection::new(comment)?;
    for member in &index.members {
        let marker = persistence::read_resolving(member, store, registry, &mut resolved)?;
        collection.push(marker)?;
    }
    Ok(collection)
}
