//! Events as submitted by callers and as read back from the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Position;
use crate::error::ValidationError;
use crate::ids::EventId;
use crate::tag::Tag;

/// Maximum length of an event type name.
pub const MAX_EVENT_TYPE_LEN: usize = 64;

/// An event to be appended.
///
/// The identifier, position, and timestamp are assigned by the append
/// engine. Causation and correlation are optional overrides; when absent
/// they are derived from the batch defaults (see `dcb_store::lineage`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Event type name, e.g. `AccountOpened`.
    pub event_type: String,
    /// Tags placing this event inside one or more consistency boundaries.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Type-specific payload; must be a JSON object or array.
    pub data: serde_json::Value,
    /// Explicit causation override.
    #[serde(default)]
    pub causation_id: Option<EventId>,
    /// Explicit correlation override.
    #[serde(default)]
    pub correlation_id: Option<EventId>,
}

impl InputEvent {
    /// Create an event with the given type, tags, and payload.
    pub fn new(event_type: impl Into<String>, tags: Vec<Tag>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            tags,
            data,
            causation_id: None,
            correlation_id: None,
        }
    }

    /// Serialize a typed payload into a new event.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        tags: Vec<Tag>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, tags, serde_json::to_value(payload)?))
    }

    /// Set the causation override.
    #[must_use]
    pub const fn caused_by(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Set the correlation override.
    #[must_use]
    pub const fn correlated_with(mut self, id: EventId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Check type, tags, and payload shape.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type.trim().is_empty() {
            return Err(ValidationError::EmptyEventType);
        }
        if self.event_type.chars().count() > MAX_EVENT_TYPE_LEN {
            return Err(ValidationError::EventTypeTooLong {
                event_type: self.event_type.clone(),
                max: MAX_EVENT_TYPE_LEN,
            });
        }
        for tag in &self.tags {
            tag.validate()?;
        }
        if !(self.data.is_object() || self.data.is_array()) {
            return Err(ValidationError::InvalidData {
                event_type: self.event_type.clone(),
            });
        }
        Ok(())
    }
}

/// An immutable event persisted in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Event type name.
    pub event_type: String,
    /// Tags as written, in submission order.
    pub tags: Vec<Tag>,
    /// Type-specific payload.
    pub data: serde_json::Value,
    /// Global log position, assigned at commit.
    pub position: Position,
    /// The event that directly caused this one (may be itself).
    pub causation_id: EventId,
    /// The event that started the logical operation (may be itself).
    pub correlation_id: EventId,
    /// Wall-clock time of the append.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Whether this event carries every tag in `tags`.
    pub fn has_tags(&self, tags: &[Tag]) -> bool {
        tags.iter().all(|wanted| self.tags.contains(wanted))
    }

    /// Whether this event's tag set contains a tag with this key and value.
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.iter().any(|t| t.key == key && t.value == value)
    }

    /// First value for a tag key, if present.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::ProjectionError> {
        T::deserialize(&self.data).map_err(|source| crate::ProjectionError::Decode {
            event_type: self.event_type.clone(),
            position: self.position,
            source,
        })
    }
}
