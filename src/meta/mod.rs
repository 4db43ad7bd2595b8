//! Composite markers derived from other markers.

pub mod passthrough;
pub mod ratio;

pub use passthrough::PassthroughMarker;
pub use ratio::RatioMarker;
