//! Error handling.

use ndarray::ShapeError;
use std::error::Error;
use thiserror::Error;
use tracing::{event, Level};

use crate::title::Title;

/// Marker graph error type
///
/// This type encapsulates the various errors that may occur while fitting, reducing, saving or
/// reading markers. Every variant that concerns a particular marker names its title.
#[derive(Debug, Error)]
pub enum MarkerError {
    /// Operands of a composite marker have incompatible axis maps or shapes
    #[error("operands of {title} do not have the same shape ({left} vs {right})")]
    ShapeMismatch {
        title: Title,
        left: String,
        right: String,
    },

    /// Data or axis map accessed before the marker was fitted
    #[error("marker {title} is not fitted")]
    NotFitted { title: Title },

    /// Reduction request does not fit the marker's axis map
    #[error("invalid reduction for {title}: {reason}")]
    InvalidReductionSpec { title: Title, reason: String },

    /// Composite reduction reduces a channel or epoch axis too early
    #[error(
        "cannot reduce {title} along {axis} after channels or epochs: \
         channels and epochs must be the last axes to reduce"
    )]
    InvalidAxisOrder { title: Title, axis: String },

    /// Persistence read found a dependency reference that the caller did not resolve
    #[error("{title} depends on {dependency} which has not been resolved")]
    MissingDependency { title: Title, dependency: Title },

    /// Unsupported operation requested
    #[error("unsupported operation {operation}")]
    UnsupportedOperation { operation: String },

    /// Saving would overwrite an existing entry
    #[error("{title} already exists")]
    TitleExists { title: Title },

    /// Title not present in the store
    #[error("{title} not found in store")]
    NotFound { title: Title },

    /// Malformed title
    #[error("invalid title {title:?}: {reason}")]
    InvalidTitle { title: String, reason: &'static str },

    /// Malformed axis map, or data whose rank disagrees with its axis map
    #[error("invalid axis map{}: {reason}", of_marker(.title))]
    InvalidAxisMap {
        title: Option<Title>,
        reason: String,
    },

    /// Stored record cannot be turned back into a marker
    #[error("invalid record {title}: {reason}")]
    InvalidRecord { title: String, reason: String },

    /// Attempt to aggregate an empty axis
    #[error("cannot perform {operation} on empty array or selection{}", of_marker(.title))]
    EmptyArray {
        title: Option<Title>,
        operation: String,
    },

    /// Error converting from bytes to a type
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// A marker or store lock was poisoned by a panicking holder
    #[error("lock on {what} is poisoned")]
    LockPoisoned { what: String },

    /// Error validating a ReductionRequest
    #[error("reduction request is not valid")]
    RequestValidation(#[from] validator::ValidationErrors),

    /// Error creating an ndarray from a shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Error (de)serialising a record
    #[error("failed to (de)serialise marker record")]
    Serde(#[from] serde_json::Error),

    /// Error decoding stored array values
    #[error("failed to decode stored array values")]
    Hex(#[from] hex::FromHexError),

    /// Error from the persistent store
    #[error("marker store error")]
    Sled(#[from] sled::Error),

    /// I/O error
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl MarkerError {
    /// Attach `title` to an error raised outside of any marker.
    ///
    /// Errors that already name a marker are returned unchanged.
    pub fn in_marker(self, title: &Title) -> Self {
        match self {
            MarkerError::InvalidAxisMap { title: None, reason } => MarkerError::InvalidAxisMap {
                title: Some(title.clone()),
                reason,
            },
            MarkerError::EmptyArray {
                title: None,
                operation,
            } => MarkerError::EmptyArray {
                title: Some(title.clone()),
                operation,
            },
            error => error,
        }
    }
}

fn of_marker(title: &Option<Title>) -> String {
    title
        .as_ref()
        .map_or_else(String::new, |title| format!(" of {}", title))
}

/// Return the messages of an error's source chain, outermost cause first.
///
/// Adjacent duplicates are removed, since wrapped library errors often repeat their inner
/// message.
pub fn error_chain<E>(error: &E) -> Vec<String>
where
    E: std::error::Error,
{
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes.dedup();
    causes
}

/// Log an error and each of its causes at ERROR level.
pub fn log_error(error: &MarkerError) {
    event!(Level::ERROR, "{}", error.to_string());
    for cause in error_chain(error) {
        event!(Level::ERROR, "Caused by: {}", cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title() -> Title {
        Title::marker("RatioMarker", "delta_theta").unwrap()
    }

    fn test_marker_error(error: MarkerError, message: &str, caused_by: Vec<&str>) {
        assert_eq!(message, error.to_string());
        assert_eq!(caused_by, error_chain(&error));
    }

    #[test]
    fn shape_mismatch() {
        let error = MarkerError::ShapeMismatch {
            title: title(),
            left: "{epochs: 0}".to_string(),
            right: "{channels: 0}".to_string(),
        };
        let message = "operands of marker_graph/marker/RatioMarker/delta_theta do not have the \
                       same shape ({epochs: 0} vs {channels: 0})";
        test_marker_error(error, message, vec![]);
    }

    #[test]
    fn not_fitted() {
        let error = MarkerError::NotFitted { title: title() };
        let message = "marker marker_graph/marker/RatioMarker/delta_theta is not fitted";
        test_marker_error(error, message, vec![]);
    }

    #[test]
    fn invalid_axis_order() {
        let error = MarkerError::InvalidAxisOrder {
            title: title(),
            axis: "frequency".to_string(),
        };
        let message = "cannot reduce marker_graph/marker/RatioMarker/delta_theta along frequency \
                       after channels or epochs: channels and epochs must be the last axes to \
                       reduce";
        test_marker_error(error, message, vec![]);
    }

    #[test]
    fn missing_dependency() {
        let error = MarkerError::MissingDependency {
            title: title(),
            dependency: Title::marker("Psd", "delta").unwrap(),
        };
        let message = "marker_graph/marker/RatioMarker/delta_theta depends on \
                       marker_graph/marker/Psd/delta which has not been resolved";
        test_marker_error(error, message, vec![]);
    }

    #[test]
    fn unsupported_operation() {
        let error = MarkerError::UnsupportedOperation {
            operation: "foo".to_string(),
        };
        test_marker_error(error, "unsupported operation foo", vec![]);
    }

    #[test]
    fn empty_array() {
        let error = MarkerError::EmptyArray {
            title: None,
            operation: "mean".to_string(),
        };
        test_marker_error(error, "cannot perform mean on empty array or selection", vec![]);
    }

    #[test]
    fn empty_array_in_marker() {
        let error = MarkerError::EmptyArray {
            title: None,
            operation: "mean".to_string(),
        }
        .in_marker(&title());
        let message = "cannot perform mean on empty array or selection of \
                       marker_graph/marker/RatioMarker/delta_theta";
        test_marker_error(error, message, vec![]);
    }

    #[test]
    fn invalid_axis_map_in_marker() {
        let error = MarkerError::InvalidAxisMap {
            title: None,
            reason: "duplicate axis channels".to_string(),
        };
        assert_eq!("invalid axis map: duplicate axis channels", error.to_string());
        let error = error.in_marker(&title());
        let message = "invalid axis map of marker_graph/marker/RatioMarker/delta_theta: \
                       duplicate axis channels";
        test_marker_error(error, message, vec![]);
        let other = Title::marker("Psd", "delta").unwrap();
        match error_with_title(&other) {
            MarkerError::InvalidAxisMap { title, .. } => assert_eq!(Some(other), title),
            err => panic!("unexpected error {}", err),
        }
    }

    fn error_with_title(title: &Title) -> MarkerError {
        MarkerError::InvalidAxisMap {
            title: Some(title.clone()),
            reason: "bad".to_string(),
        }
        .in_marker(&Title::marker("RatioMarker", "ignored").unwrap())
    }

    #[test]
    fn invalid_title() {
        let error = MarkerError::InvalidTitle {
            title: "a/b".to_string(),
            reason: "expected 4 components",
        };
        test_marker_error(error, "invalid title \"a/b\": expected 4 components", vec![]);
    }

    #[test]
    fn shape_error() {
        let error = MarkerError::ShapeInvalid(ShapeError::from_kind(
            ndarray::ErrorKind::OutOfBounds,
        ));
        let message = "failed to create array from shape";
        let caused_by = vec!["ShapeError/OutOfBounds: out of bounds indexing"];
        test_marker_error(error, message, caused_by);
    }

    #[test]
    fn io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such store");
        let error = MarkerError::Io(io_error);
        test_marker_error(error, "I/O error", vec!["no such store"]);
    }

    #[test]
    fn request_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        validation_errors.add("picks", validator::ValidationError::new("foo"));
        let error = MarkerError::RequestValidation(validation_errors);
        let message = "reduction request is not valid";
        let caused_by = vec!["picks: Validation error: foo [{}]"];
        test_marker_error(error, message, caused_by);
    }
}
