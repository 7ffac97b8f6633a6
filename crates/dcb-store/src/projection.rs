//! State reconstruction: single projectors and decision models.
//!
//! A decision model runs many projectors over **one** read. The store
//! selects the union of all projector queries once, in position order,
//! and hands each event to every projector whose own query matches it.
//! All projectors therefore observe the same snapshot, and the resulting
//! append condition (union query, highest observed position) guards the
//! follow-up write against anything any of them would have seen.
//!
//! Folding is split from I/O. [`ProjectionSet`] is the pure fold. When a
//! decision model has several projectors and `max_projection_workers > 1`,
//! the projectors are dealt round-robin to worker tasks and every fetched
//! batch is broadcast to all workers as an `Arc<[Event]>`. Each projector
//! lives on exactly one worker and sees every batch in order, so the
//! result is identical to the sequential fold.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use dcb_types::{
    AppendCondition, BatchProjector, DecisionModel, Event, Position, ProjectionError, Query,
    StateProjector,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::store::{EventStore, HEAD_SQL};
use crate::stream::Cursor;

/// Batches buffered per worker before the reader waits.
const WORKER_QUEUE_DEPTH: usize = 2;

/// ID used for the lone projector of [`EventStore::project`].
const SINGLE_PROJECTOR_ID: &str = "projector";

/// One projector and its running state.
struct Slot<S> {
    index: usize,
    id: String,
    projector: StateProjector<S>,
    state: Option<S>,
}

/// The pure multi-projector fold.
///
/// Feed it events in position order; each event is applied to every
/// projector whose query matches it.
pub struct ProjectionSet<S> {
    slots: Vec<Slot<S>>,
    observed: Position,
}

impl<S: Clone> ProjectionSet<S> {
    /// Start a fold at every projector's initial state.
    pub fn new(projectors: &[BatchProjector<S>]) -> Self {
        let slots = projectors
            .iter()
            .enumerate()
            .map(|(index, p)| Slot {
                index,
                id: p.id.clone(),
                projector: p.projector.clone(),
                state: Some(p.projector.initial_state.clone()),
            })
            .collect();
        Self::from_slots(slots)
    }
}

impl<S> ProjectionSet<S> {
    const fn from_slots(slots: Vec<Slot<S>>) -> Self {
        Self { slots, observed: 0 }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns the first transition error; the fold must then be discarded.
    pub fn apply(&mut self, event: &Event) -> Result<(), ProjectionError> {
        let mut matched = false;
        for slot in &mut self.slots {
            if !slot.projector.query.matches(event) {
                continue;
            }
            let state = slot.state.take().ok_or_else(|| ProjectionError::Rejected {
                event_type: event.event_type.clone(),
                position: event.position,
                reason: format!("state of projector `{}` lost after an earlier failure", slot.id),
            })?;
            slot.state = Some((slot.projector.transition)(state, event)?);
            matched = true;
        }
        if matched {
            self.observed = self.observed.max(event.position);
        }
        Ok(())
    }

    /// Apply a position-ordered batch.
    ///
    /// # Errors
    ///
    /// Returns the first transition error.
    pub fn apply_batch(&mut self, events: &[Event]) -> Result<(), ProjectionError> {
        events.iter().try_for_each(|event| self.apply(event))
    }

    /// Highest position applied to any projector, 0 if none.
    pub const fn observed(&self) -> Position {
        self.observed
    }

    /// Final `(id, state)` pairs in projector order.
    pub fn into_states(self) -> Vec<(String, S)> {
        let mut slots = self.slots;
        slots.sort_by_key(|slot| slot.index);
        slots
            .into_iter()
            .filter_map(|slot| slot.state.map(|state| (slot.id, state)))
            .collect()
    }

    fn into_slots(self) -> Vec<Slot<S>> {
        self.slots
    }
}

/// Projectors dealt across worker tasks.
struct FanOut<S> {
    senders: Vec<mpsc::Sender<Arc<[Event]>>>,
    workers: Vec<JoinHandle<Result<ProjectionSet<S>, ProjectionError>>>,
}

impl<S> FanOut<S>
where
    S: Clone + Send + 'static,
{
    fn spawn(projectors: &[BatchProjector<S>], worker_count: usize) -> Self {
        let mut buckets: Vec<Vec<Slot<S>>> = (0..worker_count).map(|_| Vec::new()).collect();
        let mut dealt = ProjectionSet::new(projectors).into_slots().into_iter();
        'deal: loop {
            for bucket in &mut buckets {
                match dealt.next() {
                    Some(slot) => bucket.push(slot),
                    None => break 'deal,
                }
            }
        }

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for bucket in buckets.into_iter().filter(|b| !b.is_empty()) {
            let (sender, mut receiver) = mpsc::channel::<Arc<[Event]>>(WORKER_QUEUE_DEPTH);
            senders.push(sender);
            workers.push(tokio::spawn(async move {
                let mut set = ProjectionSet::from_slots(bucket);
                while let Some(batch) = receiver.recv().await {
                    set.apply_batch(&batch)?;
                }
                Ok::<_, ProjectionError>(set)
            }));
        }
        Self { senders, workers }
    }

    /// Broadcast a batch to every worker.
    ///
    /// A closed channel means that worker already failed; its error is
    /// collected by [`FanOut::finish`].
    async fn feed(&self, batch: Arc<[Event]>) -> bool {
        for sender in &self.senders {
            if sender.send(Arc::clone(&batch)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Close the channels and merge every worker's fold.
    async fn finish(mut self) -> Result<(Vec<(String, S)>, Position), StoreError> {
        self.senders.clear();
        let mut slots = Vec::new();
        let mut observed: Position = 0;
        for worker in std::mem::take(&mut self.workers) {
            let set = worker
                .await
                .map_err(|e| StoreError::Worker(e.to_string()))??;
            observed = observed.max(set.observed());
            slots.extend(set.into_slots());
        }
        Ok((ProjectionSet::from_slots(slots).into_states(), observed))
    }
}

impl<S> Drop for FanOut<S> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// Inline or fanned-out fold, chosen per projection.
enum Folder<S> {
    Inline(ProjectionSet<S>),
    FanOut(FanOut<S>),
}

impl<S> Folder<S>
where
    S: Clone + Send + 'static,
{
    fn new(projectors: &[BatchProjector<S>], max_workers: usize) -> Self {
        let worker_count = max_workers.min(projectors.len());
        if worker_count > 1 {
            Self::FanOut(FanOut::spawn(projectors, worker_count))
        } else {
            Self::Inline(ProjectionSet::new(projectors))
        }
    }

    async fn feed(&mut self, batch: Vec<Event>) -> Result<bool, StoreError> {
        match self {
            Self::Inline(set) => {
                set.apply_batch(&batch)?;
                Ok(true)
            }
            Self::FanOut(fan_out) => Ok(fan_out.feed(batch.into()).await),
        }
    }

    async fn finish(self) -> Result<(Vec<(String, S)>, Position), StoreError> {
        match self {
            Self::Inline(set) => {
                let observed = set.observed();
                Ok((set.into_states(), observed))
            }
            Self::FanOut(fan_out) => fan_out.finish().await,
        }
    }
}

/// Raw result of one projection read.
struct FoldOutcome<S> {
    states: Vec<(String, S)>,
    observed: Position,
    head: Position,
}

/// Reject empty sets, duplicate IDs, and invalid queries.
fn validate_projectors<S>(projectors: &[BatchProjector<S>]) -> Result<(), StoreError> {
    if projectors.is_empty() {
        return Err(StoreError::InvalidProjector(
            "at least one projector is required".to_owned(),
        ));
    }
    let mut seen = HashSet::with_capacity(projectors.len());
    for p in projectors {
        if p.id.is_empty() {
            return Err(StoreError::InvalidProjector(
                "projector ID must not be empty".to_owned(),
            ));
        }
        if !seen.insert(p.id.as_str()) {
            return Err(StoreError::InvalidProjector(format!(
                "duplicate projector ID `{}`",
                p.id
            )));
        }
        p.projector.query.validate()?;
    }
    Ok(())
}

impl EventStore {
    /// Fold every event matching `projector.query` into a final state.
    ///
    /// Returns the state and the highest position the projector observed
    /// (0 if no event matched), usable as a checkpoint or as the anchor of
    /// an [`AppendCondition`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TooManyProjections`] if the admission gate is
    /// full, [`StoreError::Projection`] if the transition rejects an
    /// event, [`StoreError::Timeout`] past `query_timeout`, or the backend
    /// error. Partial state is never returned.
    pub async fn project<S>(&self, projector: &StateProjector<S>) -> Result<(S, Position), StoreError>
    where
        S: Clone + Send + 'static,
    {
        let projectors = [BatchProjector::new(SINGLE_PROJECTOR_ID, projector.clone())];
        let outcome = self.run_projection(&projectors, &projector.query).await?;
        let state = outcome
            .states
            .into_iter()
            .next()
            .map(|(_, state)| state)
            .ok_or_else(|| StoreError::Worker("projector produced no state".to_owned()))?;
        Ok((state, outcome.observed))
    }

    /// Run several projectors over one consistent read.
    ///
    /// The returned append condition covers the union of all projector
    /// queries. It is anchored at the highest position any projector
    /// observed or, if no event matched at all, at the log head seen by
    /// the same read.
    ///
    /// # Errors
    ///
    /// As [`EventStore::project`], plus [`StoreError::InvalidProjector`] for
    /// an empty set or duplicate IDs.
    pub async fn project_decision_model<S>(
        &self,
        projectors: &[BatchProjector<S>],
    ) -> Result<DecisionModel<S>, StoreError>
    where
        S: Clone + Send + 'static,
    {
        let union = Query::union(projectors.iter().map(|p| &p.projector.query));
        let outcome = self.run_projection(projectors, &union).await?;
        let after_position = if outcome.observed > 0 {
            outcome.observed
        } else {
            outcome.head
        };

        Ok(DecisionModel {
            states: outcome.states.into_iter().collect::<BTreeMap<_, _>>(),
            append_condition: AppendCondition::new(union, after_position),
        })
    }

    /// Admit, read `union` once through a cursor, and fold.
    async fn run_projection<S>(
        &self,
        projectors: &[BatchProjector<S>],
        union: &Query,
    ) -> Result<FoldOutcome<S>, StoreError>
    where
        S: Clone + Send + 'static,
    {
        let _permit = self.limiter().try_admit()?;
        validate_projectors(projectors)?;

        let started = Instant::now();
        let query_timeout = self.config().query_timeout();
        let batch_size = self.config().fetch_batch_size;
        let full_batch = usize::try_from(batch_size).unwrap_or(usize::MAX);

        let outcome = self
            .deadline("projection", query_timeout, async {
                let mut tx = self.begin(self.config().default_read_isolation).await?;
                let head: i64 = sqlx::query_scalar(HEAD_SQL).fetch_one(&mut *tx).await?;
                let mut cursor = Cursor::declare(tx, union, 0, None, query_timeout).await?;
                let mut folder = Folder::new(projectors, self.config().max_projection_workers);

                loop {
                    let batch = cursor.fetch(batch_size).await?;
                    let last = batch.len() < full_batch;
                    if !batch.is_empty() && !folder.feed(batch).await? {
                        // A worker failed; finish() below surfaces its error.
                        break;
                    }
                    if last {
                        break;
                    }
                }
                cursor.close().await?;
                let (states, observed) = folder.finish().await?;
                Ok(FoldOutcome {
                    states,
                    observed,
                    head,
                })
            })
            .await?;

        tracing::debug!(
            projectors = projectors.len(),
            observed = outcome.observed,
            head = outcome.head,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Projection completed"
        );
        Ok(outcome)
    }
}
