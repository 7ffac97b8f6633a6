//! Atomic and condition-guarded appends.
//!
//! Every append runs in exactly one transaction:
//!
//! ```text
//! BEGIN; SET TRANSACTION ISOLATION LEVEL <append isolation>
//!   SET CONSTRAINTS ALL DEFERRED; SET LOCAL lock_timeout
//!   LOCK TABLE events IN EXCLUSIVE MODE       -- linearize appends
//!   [SELECT EXISTS (... conflict ...)]        -- only for append_if
//!   SELECT MAX(position)                      -- head under the lock
//!   INSERT ... SELECT * FROM UNNEST(...)      -- head+1 ..= head+n
//! COMMIT
//! ```
//!
//! The lock must be the first statement that touches the table. Under
//! `REPEATABLE READ` and `SERIALIZABLE` the transaction snapshot is taken
//! by the first query, so taking the lock any later would leave the head
//! read looking at a log from before the previous writer committed.
//! `EXCLUSIVE` mode blocks other writers but not plain readers. Holding it
//! from the conflict check through commit means no concurrent writer can
//! slip a matching event in between, and commits land in position order
//! so readers always see a gapless prefix of the log.

use std::time::Instant;

use dcb_types::{AppendCondition, EventId, InputEvent, Position, ValidationError};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lineage::{self, Lineage, PreparedEvent};
use crate::sql;
use crate::store::{EventStore, HEAD_SQL};

/// Serializes writers to the event log. Takes no snapshot.
const LOCK_LOG_SQL: &str = "LOCK TABLE events IN EXCLUSIVE MODE";

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    /// Position of the first event written.
    pub first_position: Position,
    /// Position of the last event written.
    pub last_position: Position,
    /// Identifiers of the written events, in submission order.
    pub event_ids: Vec<EventId>,
}

impl AppendResult {
    /// Number of events written.
    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    /// Whether nothing was written (never true for a successful append).
    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }
}

impl EventStore {
    /// Append a batch unconditionally.
    ///
    /// Events receive consecutive positions in submission order. Either
    /// every event is written or none is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEvent`] for a malformed batch,
    /// [`StoreError::Timeout`] past `append_timeout`, or the backend error.
    pub async fn append(&self, events: Vec<InputEvent>) -> Result<AppendResult, StoreError> {
        self.append_with(events, None, &Lineage::new()).await
    }

    /// Append a batch only if `condition` holds at commit time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConcurrencyConflict`] if an event matching the
    /// condition's query exists after its anchor position; nothing is
    /// written in that case. Otherwise as [`EventStore::append`].
    pub async fn append_if(
        &self,
        events: Vec<InputEvent>,
        condition: &AppendCondition,
    ) -> Result<AppendResult, StoreError> {
        self.append_with(events, Some(condition), &Lineage::new())
            .await
    }

    /// General append: optional condition, explicit lineage defaults.
    ///
    /// # Errors
    ///
    /// See [`EventStore::append`] and [`EventStore::append_if`].
    pub async fn append_with(
        &self,
        events: Vec<InputEvent>,
        condition: Option<&AppendCondition>,
        lineage: &Lineage,
    ) -> Result<AppendResult, StoreError> {
        validate_batch(&events, self.config().max_batch_size)?;
        if let Some(condition) = condition {
            condition.fail_if_events_match.validate()?;
        }

        let prepared = lineage::resolve(events, lineage);
        let started = Instant::now();
        let result = self
            .deadline(
                "append",
                self.config().append_timeout(),
                self.append_in_transaction(&prepared, condition),
            )
            .await?;

        tracing::debug!(
            count = result.len(),
            first_position = result.first_position,
            last_position = result.last_position,
            conditional = condition.is_some(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Appended events"
        );
        Ok(result)
    }

    async fn append_in_transaction(
        &self,
        prepared: &[PreparedEvent],
        condition: Option<&AppendCondition>,
    ) -> Result<AppendResult, StoreError> {
        let mut tx = self.begin(self.config().default_append_isolation).await?;

        sqlx::query("SET CONSTRAINTS ALL DEFERRED")
            .execute(&mut *tx)
            .await?;
        // SET does not accept bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.config().lock_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(LOCK_LOG_SQL).execute(&mut *tx).await?;

        if let Some(condition) = condition {
            let conflict: bool = sql::conflict_check(condition)
                .build_query_scalar()
                .fetch_one(&mut *tx)
                .await?;
            if conflict {
                tx.rollback().await?;
                tracing::warn!(
                    after_position = condition.after_position,
                    items = condition.fail_if_events_match.items.len(),
                    "Append rejected: condition violated"
                );
                return Err(StoreError::ConcurrencyConflict {
                    after_position: condition.after_position,
                });
            }
        }

        let head: i64 = sqlx::query_scalar(HEAD_SQL).fetch_one(&mut *tx).await?;
        let result = insert_rows(&mut tx, prepared, head).await?;
        tx.commit().await?;
        Ok(result)
    }
}

/// Reject empty, oversized, or malformed batches before touching the pool.
fn validate_batch(events: &[InputEvent], max_batch_size: usize) -> Result<(), ValidationError> {
    if events.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if events.len() > max_batch_size {
        return Err(ValidationError::BatchTooLarge {
            size: events.len(),
            max: max_batch_size,
        });
    }
    for (index, event) in events.iter().enumerate() {
        event.validate().map_err(|source| ValidationError::InBatch {
            index,
            source: Box::new(source),
        })?;
    }
    Ok(())
}

/// Insert the batch at positions `head+1 ..= head+n` with one statement.
async fn insert_rows(
    tx: &mut Transaction<'static, Postgres>,
    prepared: &[PreparedEvent],
    head: Position,
) -> Result<AppendResult, StoreError> {
    let len = prepared.len();
    let mut ids: Vec<Uuid> = Vec::with_capacity(len);
    let mut types: Vec<String> = Vec::with_capacity(len);
    // TEXT[][] cannot be ragged, so tags travel as one JSON array per row.
    let mut tags: Vec<serde_json::Value> = Vec::with_capacity(len);
    let mut data: Vec<serde_json::Value> = Vec::with_capacity(len);
    let mut positions: Vec<i64> = Vec::with_capacity(len);
    let mut causations: Vec<Uuid> = Vec::with_capacity(len);
    let mut correlations: Vec<Uuid> = Vec::with_capacity(len);
    let mut timestamps = Vec::with_capacity(len);

    let mut position = head;
    for event in prepared {
        position = position.saturating_add(1);
        ids.push(event.id.into_inner());
        types.push(event.event_type.clone());
        tags.push(serde_json::to_value(&event.tags)?);
        data.push(event.data.clone());
        positions.push(position);
        causations.push(event.causation_id.into_inner());
        correlations.push(event.correlation_id.into_inner());
        timestamps.push(event.created_at);
    }

    sqlx::query(
        r"INSERT INTO events (id, type, tags, data, position, causation_id, correlation_id, created_at)
          SELECT u.id, u.type,
                 ARRAY(SELECT t.tag FROM jsonb_array_elements_text(u.tags) WITH ORDINALITY AS t(tag, ord) ORDER BY t.ord),
                 u.data, u.position, u.causation_id, u.correlation_id, u.created_at
          FROM UNNEST($1::UUID[], $2::TEXT[], $3::JSONB[], $4::JSONB[], $5::BIGINT[], $6::UUID[], $7::UUID[], $8::TIMESTAMPTZ[])
            AS u(id, type, tags, data, position, causation_id, correlation_id, created_at)",
    )
    .bind(&ids)
    .bind(&types)
    .bind(&tags)
    .bind(&data)
    .bind(&positions)
    .bind(&causations)
    .bind(&correlations)
    .bind(&timestamps)
    .execute(&mut **tx)
    .await?;

    let first_position = head.saturating_add(1);
    Ok(AppendResult {
        first_position,
        last_position: position,
        event_ids: prepared.iter().map(|e| e.id).collect(),
    })
}
