//! State projectors and decision models.
//!
//! A projector is a pure fold: it starts from an initial state and applies
//! a transition function to every event matching its query, in position
//! order. Projectors are generic over their state type; a decision model
//! combining differently-shaped states uses an enum as `S` and matches on
//! it exhaustively inside the transition.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::Position;
use crate::condition::AppendCondition;
use crate::error::ProjectionError;
use crate::event::Event;
use crate::query::Query;

/// Transition function `(state, event) -> state`.
pub type TransitionFn<S> = Arc<dyn Fn(S, &Event) -> Result<S, ProjectionError> + Send + Sync>;

/// A fold over the events matching a query.
pub struct StateProjector<S> {
    /// Which events this projector consumes.
    pub query: Query,
    /// State before any event is applied.
    pub initial_state: S,
    /// How each event changes the state.
    pub transition: TransitionFn<S>,
}

impl<S> StateProjector<S> {
    /// Build a projector from a query, initial state, and transition.
    pub fn new<F>(query: Query, initial_state: S, transition: F) -> Self
    where
        F: Fn(S, &Event) -> Result<S, ProjectionError> + Send + Sync + 'static,
    {
        Self {
            query,
            initial_state,
            transition: Arc::new(transition),
        }
    }

    /// Apply one event if it matches this projector's query.
    pub fn apply(&self, state: S, event: &Event) -> Result<S, ProjectionError> {
        if self.query.matches(event) {
            (self.transition)(state, event)
        } else {
            Ok(state)
        }
    }
}

impl<S: Clone> StateProjector<S> {
    /// Fold a position-ordered slice of events from the initial state.
    pub fn fold<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> Result<S, ProjectionError> {
        events
            .into_iter()
            .try_fold(self.initial_state.clone(), |state, event| self.apply(state, event))
    }
}

impl<S: Clone> Clone for StateProjector<S> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            initial_state: self.initial_state.clone(),
            transition: Arc::clone(&self.transition),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for StateProjector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateProjector")
            .field("query", &self.query)
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}

/// A named projector taking part in a decision model.
#[derive(Debug, Clone)]
pub struct BatchProjector<S> {
    /// Name under which the final state is reported.
    pub id: String,
    /// The projector itself.
    pub projector: StateProjector<S>,
}

impl<S> BatchProjector<S> {
    /// Name a projector.
    pub fn new(id: impl Into<String>, projector: StateProjector<S>) -> Self {
        Self {
            id: id.into(),
            projector,
        }
    }
}

/// Result of a decision-model read.
///
/// `append_condition` covers the union of every projector's query and is
/// anchored at the highest position any of them observed, so appending
/// with it fails if anything relevant changed since the read.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionModel<S> {
    /// Final state per projector ID.
    pub states: BTreeMap<String, S>,
    /// Guard for the follow-up append.
    pub append_condition: AppendCondition,
}

impl<S> DecisionModel<S> {
    /// Final state of one projector.
    pub fn state(&self, id: &str) -> Option<&S> {
        self.states.get(id)
    }

    /// Anchor position of the append condition.
    pub const fn position(&self) -> Position {
        self.append_condition.after_position
    }
}
