//! The DCB append condition.

use serde::{Deserialize, Serialize};

use crate::Position;
use crate::event::Event;
use crate::query::Query;

/// Guard for a conditional append.
///
/// Asserts that no event matching [`fail_if_events_match`] exists at a
/// position strictly greater than [`after_position`]. An `after_position`
/// of 0 therefore means "no matching event anywhere in the log".
///
/// [`fail_if_events_match`]: AppendCondition::fail_if_events_match
/// [`after_position`]: AppendCondition::after_position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendCondition {
    /// The consistency boundary.
    pub fail_if_events_match: Query,
    /// The last position the caller's decision was based on.
    #[serde(default)]
    pub after_position: Position,
}

impl AppendCondition {
    /// Condition on `query` with nothing new after `after_position`.
    pub const fn new(query: Query, after_position: Position) -> Self {
        Self {
            fail_if_events_match: query,
            after_position,
        }
    }

    /// Condition that no event matching `query` exists at all.
    pub const fn none_matching(query: Query) -> Self {
        Self::new(query, 0)
    }

    /// Whether `event` violates this condition.
    pub fn is_violated_by(&self, event: &Event) -> bool {
        event.position > self.after_position && self.fail_if_events_match.matches(event)
    }
}
