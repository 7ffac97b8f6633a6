//! Row mapping between the `events` table and [`Event`].

use chrono::{DateTime, Utc};
use dcb_types::{Event, EventId, Tag};
use uuid::Uuid;

use crate::error::StoreError;

/// A row from the `events` table.
///
/// Uses runtime types rather than compile-time checked types to
/// avoid requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event UUID.
    pub id: Uuid,
    /// Event type name.
    #[sqlx(rename = "type")]
    pub event_type: String,
    /// Tags in `key:value` form.
    pub tags: Vec<String>,
    /// Type-specific payload.
    pub data: serde_json::Value,
    /// Global log position.
    pub position: i64,
    /// Direct cause.
    pub causation_id: Uuid,
    /// Logical operation.
    pub correlation_id: Uuid,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let tags = row
            .tags
            .iter()
            .map(|raw| raw.parse::<Tag>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::CorruptRow {
                position: row.position,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: EventId(row.id),
            event_type: row.event_type,
            tags,
            data: row.data,
            position: row.position,
            causation_id: EventId(row.causation_id),
            correlation_id: EventId(row.correlation_id),
            created_at: row.created_at,
        })
    }
}
