//! Core identity types shared across the archive engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical `(database, collection)` identity of a dump stream.
///
/// Every stream written into an archive belongs to exactly one namespace, and
/// the archive framing records which namespace each run of records belongs
/// to. Identity is the pair: two namespaces are equal iff both components
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Create a namespace from its database and collection components.
    ///
    /// # Errors
    /// Returns an error if either component is empty, if the database name
    /// contains a dot (dots separate the components in the rendered form),
    /// or if either component contains a NUL byte (NUL cannot be framed in
    /// an archive header).
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> crate::Result<Self> {
        let database = database.into();
        let collection = collection.into();

        if database.is_empty() {
            return Err(crate::Error::InvalidNamespace {
                message: "database name cannot be empty".to_string(),
            });
        }
        if collection.is_empty() {
            return Err(crate::Error::InvalidNamespace {
                message: "collection name cannot be empty".to_string(),
            });
        }
        if database.contains('.') {
            return Err(crate::Error::InvalidNamespace {
                message: format!("database name `{database}` cannot contain a dot"),
            });
        }
        if database.contains('\0') || collection.contains('\0') {
            return Err(crate::Error::InvalidNamespace {
                message: "namespace components cannot contain NUL bytes".to_string(),
            });
        }

        Ok(Self { database, collection })
    }

    /// The database component.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The collection component.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = crate::Error;

    /// Parse a `database.collection` string.
    ///
    /// The split happens at the first dot: collection names may contain
    /// dots, database names may not.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((database, collection)) => Self::new(database, collection),
            None => Err(crate::Error::InvalidNamespace {
                message: format!("`{s}` is missing a `.` separator"),
            }),
        }
    }
}
