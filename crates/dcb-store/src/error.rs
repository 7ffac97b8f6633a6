//! Error types for the event store.
//!
//! All errors are propagated via [`StoreError`]. Backend failures wrap the
//! underlying [`sqlx`] error unchanged; nothing is retried or swallowed
//! inside the store, because blindly retrying a non-idempotent append is
//! unsafe. Retry policy belongs to the caller.

use dcb_types::{Position, ProjectionError, ValidationError};

use crate::config::ConfigError;

/// Errors that can occur in the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An append condition was violated: an event matching the guarded
    /// query exists after the anchor position. Nothing was written.
    #[error("append condition violated: matching event found after position {after_position}")]
    ConcurrencyConflict {
        /// The anchor position of the violated condition.
        after_position: Position,
    },

    /// The projection admission gate is full.
    ///
    /// Purely a resource-protection signal; safe to retry with backoff.
    #[error("too many concurrent projections ({current_count}/{max_concurrent})")]
    TooManyProjections {
        /// Configured admission limit.
        max_concurrent: usize,
        /// Projections in flight when admission was attempted.
        current_count: usize,
    },

    /// An event or query failed validation.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] ValidationError),

    /// The projector set handed to a decision-model read is unusable.
    #[error("invalid projector set: {0}")]
    InvalidProjector(String),

    /// A transition function rejected an event.
    #[error("projection failed: {0}")]
    Projection(#[from] ProjectionError),

    /// An operation exceeded its configured deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Which operation timed out.
        operation: &'static str,
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// A stored row could not be converted back into an event.
    #[error("corrupt event row at position {position}: {reason}")]
    CorruptRow {
        /// Position of the bad row.
        position: Position,
        /// What was wrong with it.
        reason: String,
    },

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store or pool was handed an unusable configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An internal projection worker stopped unexpectedly.
    #[error("projection worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    /// Whether this error is an append-condition violation.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// Conflicts are excluded: the caller must re-read the decision model
    /// before retrying, not replay the same append.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TooManyProjections { .. } | Self::Timeout { .. })
    }
}
