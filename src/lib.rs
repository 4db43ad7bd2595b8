//! This crate provides composite markers over epoched time-series data. A marker is a named
//! feature extractor whose fitted data is an n-dimensional array described by an axis map.
//!
//! Three concerns are covered:
//!
//! * [Markers](marker): leaf markers wrap an estimator, while composite markers such as
//!   [ratios](meta::RatioMarker) and [passthroughs](meta::PassthroughMarker) derive their data
//!   from upstream markers held by shared reference.
//! * [Reductions](reduction): a fitted marker is reduced to a target shape (a scalar, one value
//!   per channel or one value per epoch) by an ordered list of per-axis aggregations. Composite
//!   markers distribute the reduction over their operands where the result is unchanged.
//! * [Persistence](persistence): a marker graph is saved to a [store] as one JSON record per
//!   marker, with upstream markers referenced by [title]. Shared upstream markers are written
//!   once and read back as one shared instance.
//!
//! The crate is built on top of a number of open source components.
//!
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation, with [ndarray_stats] for NaN-aware extrema.
//! * [Serde](serde) performs (de)serialisation of records and reduction requests.
//! * [sled] is the embedded database behind the persistent store.

pub mod app;
pub mod array;
pub mod axis_map;
pub mod batch;
pub mod cli;
pub mod collection;
pub mod error;
pub mod marker;
pub mod meta;
pub mod models;
pub mod operations;
pub mod persistence;
pub mod reduction;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod title;
pub mod tracing;
