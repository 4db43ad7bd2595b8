//! Hierarchical marker titles.
//!
//! A title has the form `<collection>/<kind>/<class-name>/<comment>`. It is both the key under
//! which a marker is persisted and the typed reference a composite marker stores for each of
//! its dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;

use crate::error::MarkerError;

/// Collection component shared by every title written by this crate.
pub const COLLECTION: &str = "marker_graph";

/// Comment used when none is given.
pub const DEFAULT_COMMENT: &str = "default";

/// Kind of object a title refers to
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[strum(serialize_all = "lowercase")]
pub enum Kind {
    /// A leaf or composite marker
    Marker,
    /// The index record of a marker collection
    Collection,
}

impl FromStr for Kind {
    type Err = MarkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marker" => Ok(Kind::Marker),
            "collection" => Ok(Kind::Collection),
            _ => Err(MarkerError::InvalidTitle {
                title: s.to_string(),
                reason: "unknown kind",
            }),
        }
    }
}

/// A validated `<collection>/<kind>/<class-name>/<comment>` identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Title {
    collection: String,
    kind: Kind,
    class_name: String,
    comment: String,
}

/// Validate a single title component.
fn validate_component(component: &str, title: &str) -> Result<(), MarkerError> {
    if component.is_empty() {
        return Err(MarkerError::InvalidTitle {
            title: title.to_string(),
            reason: "components must not be empty",
        });
    }
    if component.contains('/') {
        return Err(MarkerError::InvalidTitle {
            title: title.to_string(),
            reason: "components must not contain '/'",
        });
    }
    Ok(())
}

impl Title {
    /// Return a new Title, validating each component.
    pub fn new(kind: Kind, class_name: &str, comment: &str) -> Result<Self, MarkerError> {
        let display = format!("{}/{}/{}/{}", COLLECTION, kind, class_name, comment);
        validate_component(class_name, &display)?;
        validate_component(comment, &display)?;
        Ok(Title {
            collection: COLLECTION.to_string(),
            kind,
            class_name: class_name.to_string(),
            comment: comment.to_string(),
        })
    }

    /// Return the title of a marker of class `class_name` with the given comment.
    pub fn marker(class_name: &str, comment: &str) -> Result<Self, MarkerError> {
        Self::new(Kind::Marker, class_name, comment)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Returns `<class-name>/<comment>`, the key used for per-marker reduction parameters.
    pub fn short(&self) -> String {
        format!("{}/{}", self.class_name, self.comment)
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.collection, self.kind, self.class_name, self.comment
        )
    }
}

impl FromStr for Title {
    type Err = MarkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let &[collection, kind, class_name, comment] = parts.as_slice() else {
            return Err(MarkerError::InvalidTitle {
                title: s.to_string(),
                reason: "expected 4 components",
            });
        };
        validate_component(collection, s)?;
        let kind = kind.parse::<Kind>().map_err(|_| MarkerError::InvalidTitle {
            title: s.to_string(),
            reason: "unknown kind",
        })?;
        validate_component(class_name, s)?;
        validate_component(comment, s)?;
        Ok(Title {
            collection: collection.to_string(),
            kind,
            class_name: class_name.to_string(),
            comment: comment.to_string(),
        })
    }
}

impl TryFrom<String> for Title {
    type Error = MarkerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Title> for String {
    fn from(title: Title) -> Self {
        title.to_string()
    }
}
