//! Entity identifier: a `domain.object_id` pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing or constructing an [`EntityId`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error("domain must be lowercase alphanumeric with single underscores, not at the edges")]
    InvalidDomain,

    #[error("object_id must be lowercase alphanumeric with underscores, not at the edges")]
    InvalidObjectId,
}

/// The addressable unit of state, e.g. `light.living_room`.
///
/// The domain is the category prefix (`light`, `sensor`, ...) and the
/// object id names the individual entity within it. Both parts are
/// lowercase alphanumeric with underscores; underscores may not lead or
/// trail, and a domain may not contain a double underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    full: String,
    dot: usize,
}

impl EntityId {
    /// Build an entity id from its two parts, validating both.
    pub fn new(
        domain: impl AsRef<str>,
        object_id: impl AsRef<str>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.as_ref();
        let object_id = object_id.as_ref();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if !valid_segment(domain) || domain.contains("__") {
            return Err(EntityIdError::InvalidDomain);
        }
        if !valid_segment(object_id) {
            return Err(EntityIdError::InvalidObjectId);
        }

        Ok(Self {
            full: format!("{domain}.{object_id}"),
            dot: domain.len(),
        })
    }

    /// The category prefix of this id.
    pub fn domain(&self) -> &str {
        &self.full[..self.dot]
    }

    /// The per-entity part of this id.
    pub fn object_id(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    /// The full `domain.object_id` string.
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

/// Lowercase alphanumeric plus underscore; no leading/trailing underscore.
fn valid_segment(s: &str) -> bool {
    if s.starts_with('_') || s.ends_with('_') {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => {
                Self::new(domain, object_id)
            }
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.full
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
