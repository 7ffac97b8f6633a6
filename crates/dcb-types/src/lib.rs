//! Shared type definitions for the DCB event store.
//!
//! This crate holds the vocabulary that every other crate in the workspace
//! speaks: events, tags, queries, append conditions, and projectors. All
//! matching logic here is pure; nothing in this crate touches the database.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for event identifiers
//! - [`tag`] -- Key/value tags and their `key:value` text form
//! - [`event`] -- Input events (to append) and persisted events (read back)
//! - [`query`] -- Query items and tag-containment matching
//! - [`condition`] -- The DCB append condition
//! - [`projector`] -- State projectors, batch projectors, decision models
//! - [`error`] -- Validation and projection errors

pub mod condition;
pub mod error;
pub mod event;
pub mod ids;
pub mod projector;
pub mod query;
pub mod tag;

// Re-export all public types at crate root for convenience.
pub use condition::AppendCondition;
pub use error::{ProjectionError, ValidationError};
pub use event::{Event, InputEvent, MAX_EVENT_TYPE_LEN};
pub use ids::EventId;
pub use projector::{BatchProjector, DecisionModel, StateProjector, TransitionFn};
pub use query::{Query, QueryItem};
pub use tag::Tag;

/// A position in the global event log.
///
/// Positions start at 1 and are strictly increasing across the whole log.
/// A value of 0 refers to the empty log ("before the first event").
pub type Position = i64;
