//! Queries over the event log.
//!
//! A [`Query`] is a disjunction of [`QueryItem`]s. An item matches an event
//! when the event carries every tag the item names (containment) and, if
//! the item names any event types, the event's type is one of them.
//!
//! ```text
//! item matches  <=>  event.tags ⊇ item.tags  AND  (item.types = ∅ OR event.type ∈ item.types)
//! query matches <=>  query.items = ∅  OR  any item matches
//! ```
//!
//! The same predicate is rendered to SQL by `dcb_store::sql`; the Rust
//! version here is what projectors use to demultiplex a shared read.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::event::Event;
use crate::tag::Tag;

/// One conjunctive clause of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryItem {
    /// Accepted event types. Empty accepts every type.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Tags an event must all carry. Empty accepts every event.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl QueryItem {
    /// An item that matches events of any of `event_types` carrying all `tags`.
    pub fn new<S: Into<String>>(event_types: impl IntoIterator<Item = S>, tags: Vec<Tag>) -> Self {
        Self {
            event_types: event_types.into_iter().map(Into::into).collect(),
            tags,
        }
    }

    /// An item matching any type, restricted by tags only.
    pub const fn tags(tags: Vec<Tag>) -> Self {
        Self {
            event_types: Vec::new(),
            tags,
        }
    }

    /// An item matching the given types, regardless of tags.
    pub fn types<S: Into<String>>(event_types: impl IntoIterator<Item = S>) -> Self {
        Self::new(event_types, Vec::new())
    }

    /// Whether this item places no restriction at all.
    pub const fn is_match_all(&self) -> bool {
        self.event_types.is_empty() && self.tags.is_empty()
    }

    /// Evaluate the item against an event.
    pub fn matches(&self, event: &Event) -> bool {
        let type_ok = self.event_types.is_empty()
            || self.event_types.iter().any(|t| *t == event.event_type);
        type_ok && event.has_tags(&self.tags)
    }

    /// Validate types and tags.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ValidationError::EmptyEventType);
        }
        self.tags.iter().try_for_each(Tag::validate)
    }
}

/// A disjunction of query items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    /// The clauses; an event matches if any clause does.
    #[serde(default)]
    pub items: Vec<QueryItem>,
}

impl Query {
    /// A query that matches every event.
    pub const fn all() -> Self {
        Self { items: Vec::new() }
    }

    /// A query with the given clauses.
    pub const fn new(items: Vec<QueryItem>) -> Self {
        Self { items }
    }

    /// Shorthand for a single-item query.
    pub fn single(item: QueryItem) -> Self {
        Self { items: vec![item] }
    }

    /// Shorthand for a single tags-only item.
    pub fn tags(tags: Vec<Tag>) -> Self {
        Self::single(QueryItem::tags(tags))
    }

    /// Whether this query matches every event.
    pub fn is_match_all(&self) -> bool {
        self.items.is_empty() || self.items.iter().any(QueryItem::is_match_all)
    }

    /// Evaluate the query against an event.
    pub fn matches(&self, event: &Event) -> bool {
        self.items.is_empty() || self.items.iter().any(|item| item.matches(event))
    }

    /// Disjunction of several queries.
    ///
    /// If any input matches everything, the result does too. Duplicate
    /// items are kept once so the rendered SQL stays small.
    pub fn union<'a>(queries: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut items: Vec<QueryItem> = Vec::new();
        for query in queries {
            if query.is_match_all() {
                return Self::all();
            }
            for item in &query.items {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
        }
        Self { items }
    }

    /// Validate every clause.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.items.iter().try_for_each(QueryItem::validate)
    }
}

impl From<QueryItem> for Query {
    fn from(item: QueryItem) -> Self {
        Self::single(item)
    }
}
