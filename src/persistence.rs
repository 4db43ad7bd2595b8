//! Persistence of marker graphs.
//!
//! Each marker is stored as one JSON [MarkerRecord] under its [Title]. Composite markers store
//! their upstream markers as title references, so a shared upstream marker is written once and
//! read back as one shared instance.

use bytes::Bytes;
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::array::StoredArray;
use crate::axis_map::AxisMap;
use crate::batch::ChannelInfo;
use crate::error::MarkerError;
use crate::marker::{read_lock, shared, Attributes, Estimator, LeafMarker, Marker, MarkerRef};
use crate::meta::{PassthroughMarker, RatioMarker};
use crate::store::Store;
use crate::title::{Kind, Title};

/// Markers already reconstructed, by title.
pub type Dependencies = HashMap<Title, MarkerRef>;

/// Persisted form of a marker.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MarkerRecord {
    pub title: Title,
    /// Configuration of the marker
    #[serde(default)]
    pub params: Value,
    /// Titles of upstream markers by role
    #[serde(default)]
    pub dependencies: BTreeMap<String, Title>,
    /// Derived attributes
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis_map: Option<AxisMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StoredArray>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_info: Option<ChannelInfo>,
}

impl MarkerRecord {
    /// Return a new record holding only configuration.
    pub fn new(title: Title, params: Value) -> Self {
        MarkerRecord {
            title,
            params,
            dependencies: BTreeMap::new(),
            attributes: Attributes::new(),
            axis_map: None,
            data: None,
            channel_info: None,
        }
    }

    /// Add a dependency reference under `role`.
    pub fn with_dependency(mut self, role: &str, marker: &MarkerRef) -> Result<Self, MarkerError> {
        let title = read_lock(marker)?.title().clone();
        self.dependencies.insert(role.to_string(), title);
        Ok(self)
    }

    pub fn encode(&self) -> Result<Bytes, MarkerError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(blob: &[u8]) -> Result<Self, MarkerError> {
        Ok(serde_json::from_slice(blob)?)
    }

    /// Look up the dependency stored under `role` in the already resolved markers.
    pub fn dependency(
        &self,
        role: &str,
        resolved: &Dependencies,
    ) -> Result<MarkerRef, MarkerError> {
        let title = self
            .dependencies
            .get(role)
            .ok_or_else(|| MarkerError::InvalidRecord {
                title: self.title.to_string(),
                reason: format!("no {} dependency", role),
            })?;
        resolved
            .get(title)
            .cloned()
            .ok_or_else(|| MarkerError::MissingDependency {
                title: self.title.clone(),
                dependency: title.clone(),
            })
    }
}

/// Records scheduled for a single commit.
///
/// Records are encoded as markers are added; nothing is written until [SavePlan::commit]. The
/// existence checks against the store are not atomic with the commit.
pub struct SavePlan<'a> {
    store: &'a dyn Store,
    overwrite: bool,
    pending: Vec<(Title, Bytes)>,
    scheduled: HashMap<Title, Bytes>,
}

impl<'a> SavePlan<'a> {
    /// Return a new empty SavePlan.
    ///
    /// # Arguments
    ///
    /// * `store`: Store the plan is committed to
    /// * `overwrite`: Whether markers added to the plan may replace existing records. Upstream
    ///   markers already in the store are never replaced.
    pub fn new(store: &'a dyn Store, overwrite: bool) -> Self {
        SavePlan {
            store,
            overwrite,
            pending: Vec::new(),
            scheduled: HashMap::new(),
        }
    }

    /// Whether a record is scheduled at `title`.
    pub fn is_scheduled(&self, title: &Title) -> bool {
        self.scheduled.contains_key(title)
    }

    /// Fail with [MarkerError::TitleExists] if the record scheduled at the title of `marker`
    /// differs from the record of `marker`.
    fn check_scheduled(&self, marker: &dyn Marker) -> Result<(), MarkerError> {
        let title = marker.title();
        match self.scheduled.get(title) {
            Some(blob) if *blob != marker.record()?.encode()? => Err(MarkerError::TitleExists {
                title: title.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Titles scheduled so far, in commit order.
    pub fn titles(&self) -> impl Iterator<Item = &Title> {
        self.pending.iter().map(|(title, _)| title)
    }

    /// Schedule `marker` and any of its upstream markers not already stored.
    ///
    /// A marker whose title is already scheduled is skipped if its record is identical, and
    /// fails with [MarkerError::TitleExists] otherwise.
    pub fn add(&mut self, marker: &dyn Marker) -> Result<(), MarkerError> {
        let title = marker.title();
        if self.is_scheduled(title) {
            return self.check_scheduled(marker);
        }
        if !self.overwrite && self.store.exists(title)? {
            return Err(MarkerError::TitleExists {
                title: title.clone(),
            });
        }
        for dependency in marker.dependencies() {
            let upstream = read_lock(&dependency.marker)?;
            let upstream_title = upstream.title();
            if self.is_scheduled(upstream_title) {
                self.check_scheduled(&*upstream)?;
                continue;
            }
            if self.store.exists(upstream_title)? {
                info!(
                    title = %upstream_title,
                    role = dependency.role,
                    "{} already present, will not be overwritten",
                    upstream_title
                );
                continue;
            }
            self.add(&*upstream)?;
        }
        self.schedule(title.clone(), marker.record()?.encode()?);
        Ok(())
    }

    /// Schedule an already encoded record.
    pub(crate) fn schedule(&mut self, title: Title, blob: Bytes) {
        debug!(%title, bytes = blob.len(), "scheduled record");
        self.scheduled.insert(title.clone(), blob.clone());
        self.pending.push((title, blob));
    }

    /// Write every scheduled record to the store.
    pub fn commit(self) -> Result<Vec<Title>, MarkerError> {
        let titles: Vec<Title> = self.pending.iter().map(|(title, _)| title.clone()).collect();
        self.store.put_all(self.pending)?;
        Ok(titles)
    }
}

/// Save `marker` and every upstream marker not yet in `store`.
///
/// Returns the titles written, upstream markers first.
///
/// # Arguments
///
/// * `marker`: Marker to save
/// * `store`: Destination store
/// * `overwrite`: Whether an existing record of `marker` itself may be replaced
#[tracing::instrument(level = "DEBUG", skip(marker, store), fields(title = %marker.title()))]
pub fn save(
    marker: &dyn Marker,
    store: &dyn Store,
    overwrite: bool,
) -> Result<Vec<Title>, MarkerError> {
    let mut plan = SavePlan::new(store, overwrite);
    plan.add(marker)?;
    plan.commit()
}

/// Load and decode the record at `title`.
pub fn load(title: &Title, store: &dyn Store) -> Result<MarkerRecord, MarkerError> {
    let blob = store.get(title)?.ok_or_else(|| MarkerError::NotFound {
        title: title.clone(),
    })?;
    let record = MarkerRecord::decode(&blob)?;
    if &record.title != title {
        return Err(MarkerError::InvalidRecord {
            title: title.to_string(),
            reason: format!("record is titled {}", record.title),
        });
    }
    Ok(record)
}

/// Read the marker at `title`.
///
/// Every dependency of the stored marker must already be present in `resolved`.
///
/// # Arguments
///
/// * `title`: Title of the marker to read
/// * `store`: Store to read from
/// * `registry`: Constructors of the classes that may be read
/// * `resolved`: Upstream markers the caller has already read, by title
#[tracing::instrument(level = "DEBUG", skip(store, registry, resolved))]
pub fn read(
    title: &Title,
    store: &dyn Store,
    registry: &Registry,
    resolved: &Dependencies,
) -> Result<MarkerRef, MarkerError> {
    let record = load(title, store)?;
    if let Some(missing) = record
        .dependencies
        .values()
        .find(|dependency| !resolved.contains_key(*dependency))
    {
        return Err(MarkerError::MissingDependency {
            title: title.clone(),
            dependency: missing.clone(),
        });
    }
    registry.construct(&record, resolved)
}

/// Read the marker at `title`, reading its upstream markers from the store as needed.
///
/// Every marker read is added to `resolved`, so markers shared by several composites are
/// reconstructed once.
///
/// # Arguments
///
/// * `title`: Title of the marker to read
/// * `store`: Store to read from
/// * `registry`: Constructors of the classes that may be read
/// * `resolved`: Markers already read, by title. Updated with every marker read.
#[tracing::instrument(level = "DEBUG", skip(store, registry, resolved))]
pub fn read_resolving(
    title: &Title,
    store: &dyn Store,
    registry: &Registry,
    resolved: &mut Dependencies,
) -> Result<MarkerRef, MarkerError> {
    let mut visiting = Vec::new();
    resolve(title, store, registry, resolved, &mut visiting)
}

fn resolve(
    title: &Title,
    store: &dyn Store,
    registry: &Registry,
    resolved: &mut Dependencies,
    visiting: &mut Vec<Title>,
) -> Result<MarkerRef, MarkerError> {
    if let Some(marker) = resolved.get(title) {
        return Ok(marker.clone());
    }
    if visiting.contains(title) {
        return Err(MarkerError::InvalidRecord {
            title: title.to_string(),
            reason: "dependency cycle".to_string(),
        });
    }
    let record = load(title, store)?;
    visiting.push(title.clone());
    for dependency in record.dependencies.values() {
        resolve(dependency, store, registry, resolved, visiting)?;
    }
    visiting.pop();
    let marker = registry.construct(&record, resolved)?;
    debug!(%title, "read marker");
    resolved.insert(title.clone(), marker.clone());
    Ok(marker)
}

/// Constructor rebuilding a marker from its record and resolved dependencies.
pub type Constructor =
    Box<dyn Fn(&MarkerRecord, &Dependencies) -> Result<MarkerRef, MarkerError> + Send + Sync>;

/// Constructors of the marker classes that can be read, keyed by title kind and class name.
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<(Kind, String), Constructor>,
}

impl Registry {
    /// Return a new empty Registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a Registry holding the composite marker classes of this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            Kind::Marker,
            PassthroughMarker::CLASS_NAME,
            Box::new(|record, resolved| {
                Ok(shared(PassthroughMarker::from_record(record, resolved)?))
            }),
        );
        registry.register(
            Kind::Marker,
            RatioMarker::CLASS_NAME,
            Box::new(|record, resolved| Ok(shared(RatioMarker::from_record(record, resolved)?))),
        );
        registry
    }

    /// Register a constructor, replacing any previous one for the same class.
    pub fn register(&mut self, kind: Kind, class_name: &str, constructor: Constructor) {
        self.constructors
            .insert((kind, class_name.to_string()), constructor);
    }

    /// Register a leaf marker class whose estimator deserialises from its params.
    pub fn register_estimator<E>(&mut self, class_name: &str)
    where
        E: Estimator + DeserializeOwned + 'static,
    {
        self.register(
            Kind::Marker,
            class_name,
            Box::new(|record, _| Ok(shared(LeafMarker::from_record::<E>(record)?))),
        );
    }

    pub fn contains(&self, kind: Kind, class_name: &str) -> bool {
        self.constructors
            .contains_key(&(kind, class_name.to_string()))
    }

    /// Construct the marker described by `record`.
    pub fn construct(
        &self,
        record: &MarkerRecord,
        resolved: &Dependencies,
    ) -> Result<MarkerRef, MarkerError> {
        let key = (record.title.kind(), record.title.class_name().to_string());
        let constructor =
            self.constructors
                .get(&key)
                .ok_or_else(|| MarkerError::UnsupportedOperation {
                    operation: format!("reading {} of class {}", key.0, key.1),
                })?;
        constructor(record, resolved)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.constructors.keys().collect();
        keys.sort();
        f.debug_struct("Registry")
            .field("constructors", &keys)
            .finish()
    }
}
