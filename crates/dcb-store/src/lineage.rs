//! Causation and correlation tracking for append batches.
//!
//! Every persisted event carries a non-null `causation_id` (its direct
//! cause) and `correlation_id` (the logical operation it belongs to). For
//! each event in a batch:
//!
//! ```text
//! causation   = event override ?? batch default ?? own id
//! correlation = event override ?? batch default ?? correlation of the first event
//!               (the first event falls back to its own id)
//! ```
//!
//! Identifiers are minted here, before the insert, so that an event that
//! starts a chain can reference itself. The foreign keys are declared
//! `DEFERRABLE INITIALLY DEFERRED` and the append transaction also issues
//! `SET CONSTRAINTS ALL DEFERRED`, so such self-references are checked at
//! commit rather than per row.

use chrono::{DateTime, Utc};
use dcb_types::tag::encode_tags;
use dcb_types::{Event, EventId, InputEvent};

/// Batch-level defaults for causation and correlation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lineage {
    /// Cause applied to every event without an explicit override.
    pub causation_id: Option<EventId>,
    /// Correlation applied to every event without an explicit override.
    pub correlation_id: Option<EventId>,
}

impl Lineage {
    /// No defaults: the batch starts a new chain.
    pub const fn new() -> Self {
        Self {
            causation_id: None,
            correlation_id: None,
        }
    }

    /// Defaults that continue the chain `event` belongs to.
    ///
    /// New events are caused by `event` and share its correlation.
    pub const fn following(event: &Event) -> Self {
        Self {
            causation_id: Some(event.id),
            correlation_id: Some(event.correlation_id),
        }
    }

    /// Set the default cause.
    #[must_use]
    pub const fn with_causation(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Set the default correlation.
    #[must_use]
    pub const fn with_correlation(mut self, id: EventId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// An event with its identifier and lineage resolved, ready for insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedEvent {
    /// Freshly minted identifier.
    pub id: EventId,
    /// Event type name.
    pub event_type: String,
    /// Tags in `key:value` form.
    pub tags: Vec<String>,
    /// Payload.
    pub data: serde_json::Value,
    /// Resolved cause.
    pub causation_id: EventId,
    /// Resolved correlation.
    pub correlation_id: EventId,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

/// Mint identifiers and resolve lineage for a batch, keeping order.
pub fn resolve(events: Vec<InputEvent>, lineage: &Lineage) -> Vec<PreparedEvent> {
    let now = Utc::now();
    let mut batch_correlation: Option<EventId> = lineage.correlation_id;

    events
        .into_iter()
        .map(|event| {
            let id = EventId::new();
            let causation_id = event.causation_id.or(lineage.causation_id).unwrap_or(id);
            let correlation_id = event
                .correlation_id
                .or(lineage.correlation_id)
                .or(batch_correlation)
                .unwrap_or(id);
            if batch_correlation.is_none() {
                batch_correlation = Some(correlation_id);
            }

            PreparedEvent {
                id,
                tags: encode_tags(&event.tags),
                event_type: event.event_type,
                data: event.data,
                causation_id,
                correlation_id,
                created_at: now,
            }
        })
        .collect()
}
