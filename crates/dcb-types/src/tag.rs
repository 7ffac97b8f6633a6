//! Key/value tags attached to events.
//!
//! Tags are what DCB consistency boundaries are drawn with: a query names
//! a set of tags, and an event is in scope when it carries all of them.
//! In the database each tag is stored as the text `key:value` inside a
//! `TEXT[]` column so that containment (`@>`) can use a GIN index.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Separator between key and value in the text form of a tag.
pub const TAG_SEPARATOR: char = ':';

/// A single key/value attribute on an event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key, e.g. `account_id`.
    pub key: String,
    /// Tag value, e.g. `acc1`.
    pub value: String,
}

impl Tag {
    /// Build a tag from a key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Check that key and value are usable.
    ///
    /// Keys must be non-empty, unpadded, and free of `:`. Values must be
    /// non-empty and unpadded; they may contain `:`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key.is_empty()
            || self.key.trim() != self.key
            || self.key.contains(TAG_SEPARATOR)
        {
            return Err(ValidationError::InvalidTagKey {
                key: self.key.clone(),
            });
        }
        if self.value.is_empty() || self.value.trim() != self.value {
            return Err(ValidationError::InvalidTagValue {
                key: self.key.clone(),
                value: self.value.clone(),
            });
        }
        Ok(())
    }

    /// Render the database form, `key:value`.
    pub fn encode(&self) -> String {
        format!("{}{TAG_SEPARATOR}{}", self.key, self.value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{TAG_SEPARATOR}{}", self.key, self.value)
    }
}

impl FromStr for Tag {
    type Err = ValidationError;

    /// Parse `key:value`, splitting at the first separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once(TAG_SEPARATOR)
            .ok_or_else(|| ValidationError::MalformedTag(s.to_owned()))?;
        let tag = Self::new(key, value);
        tag.validate()?;
        Ok(tag)
    }
}

/// Encode a tag slice into its `TEXT[]` database form.
pub fn encode_tags(tags: &[Tag]) -> Vec<String> {
    tags.iter().map(Tag::encode).collect()
}
