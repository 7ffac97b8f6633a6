//! Error types for event validation and state projection.

/// An event, tag, or query failed validation.
///
/// These are caller errors: the input has to be fixed, retrying the same
/// input will always fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The event type is empty or whitespace.
    #[error("event type must not be empty")]
    EmptyEventType,

    /// The event type exceeds the maximum length.
    #[error("event type `{event_type}` exceeds {max} characters")]
    EventTypeTooLong {
        /// The offending event type.
        event_type: String,
        /// Maximum permitted length.
        max: usize,
    },

    /// A tag key is empty, padded with whitespace, or contains `:`.
    #[error("invalid tag key `{key}`")]
    InvalidTagKey {
        /// The offending key.
        key: String,
    },

    /// A tag value is empty or padded with whitespace.
    #[error("invalid value `{value}` for tag `{key}`")]
    InvalidTagValue {
        /// Key of the offending tag.
        key: String,
        /// The offending value.
        value: String,
    },

    /// Text could not be parsed as `key:value`.
    #[error("malformed tag `{0}`, expected `key:value`")]
    MalformedTag(String),

    /// Event data must be a JSON object or array.
    #[error("event data for `{event_type}` must be a JSON object or array")]
    InvalidData {
        /// Type of the event carrying the bad payload.
        event_type: String,
    },

    /// An append batch had no events.
    #[error("append batch is empty")]
    EmptyBatch,

    /// An append batch exceeded the configured maximum.
    #[error("append batch of {size} events exceeds the maximum of {max}")]
    BatchTooLarge {
        /// Number of events submitted.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An event at a given index in the batch was invalid.
    #[error("event {index} in batch: {source}")]
    InBatch {
        /// Zero-based position of the event within the submitted batch.
        index: usize,
        /// What was wrong with it.
        source: Box<ValidationError>,
    },
}

/// A projector's transition function rejected an event.
///
/// Raised instead of panicking when an event's data does not have the
/// shape the projector expects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The event payload could not be decoded into the expected type.
    #[error("cannot decode `{event_type}` at position {position}: {source}")]
    Decode {
        /// Type of the event being applied.
        event_type: String,
        /// Position of the event being applied.
        position: i64,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// The event was well-formed but not acceptable to this projector.
    #[error("projector rejected `{event_type}` at position {position}: {reason}")]
    Rejected {
        /// Type of the event being applied.
        event_type: String,
        /// Position of the event being applied.
        position: i64,
        /// Why the projector refused it.
        reason: String,
    },
}
