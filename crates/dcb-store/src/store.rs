//! The event store handle and its plain read operations.
//!
//! [`EventStore`] bundles the pool handle, the engine configuration, and
//! the projection admission gate. It is cheap to clone; clones share the
//! pool and the gate. Appends live in [`crate::append`], projections in
//! [`crate::projection`], streaming reads in [`crate::stream`].

use std::future::Future;
use std::time::Duration;

use dcb_types::{Event, EventId, Position, Query};
use sqlx::{Postgres, Transaction};

use crate::config::{IsolationLevel, StoreConfig};
use crate::error::StoreError;
use crate::limiter::ProjectionLimiter;
use crate::postgres::PostgresPool;
use crate::row::EventRow;
use crate::sql;

/// Options for plain and streaming reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Only return events strictly after this position.
    pub after_position: Position,
    /// Stop after this many events.
    pub limit: Option<u64>,
    /// Rows per cursor fetch; defaults to `store.fetch_batch_size`.
    pub batch_size: Option<u32>,
    /// Isolation override; defaults to `store.default_read_isolation`.
    pub isolation: Option<IsolationLevel>,
}

impl ReadOptions {
    /// Read from just after `position`.
    #[must_use]
    pub const fn after(mut self, position: Position) -> Self {
        self.after_position = position;
        self
    }

    /// Cap the number of events returned.
    #[must_use]
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the cursor batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Override the read isolation level.
    #[must_use]
    pub const fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub(crate) fn sql_limit(&self) -> Option<i64> {
        self.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
    }
}

/// Handle to the DCB event log.
#[derive(Clone)]
pub struct EventStore {
    pool: PostgresPool,
    config: StoreConfig,
    limiter: ProjectionLimiter,
}

impl EventStore {
    /// Create a store over an open pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `config` has a zero batch size,
    /// buffer, or limit. A zero fetch size would read nothing and a zero
    /// stream buffer cannot back a channel.
    pub fn new(pool: PostgresPool, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let limiter = ProjectionLimiter::new(config.max_concurrent_projections);
        Ok(Self {
            pool,
            config,
            limiter,
        })
    }

    /// The engine configuration.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The pool handle.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    /// The projection admission gate.
    pub const fn limiter(&self) -> &ProjectionLimiter {
        &self.limiter
    }

    /// Highest committed position, or 0 for an empty log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn head_position(&self) -> Result<Position, StoreError> {
        let head: i64 = sqlx::query_scalar(HEAD_SQL)
            .fetch_one(self.pool.pool())
            .await?;
        Ok(head)
    }

    /// Collect every event matching `query`, in position order.
    ///
    /// For large results prefer [`EventStore::read_batches`] or
    /// [`EventStore::stream`], which bound memory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEvent`] for an invalid query,
    /// [`StoreError::Timeout`] past `query_timeout`, or the backend error.
    pub async fn read(&self, query: &Query, options: ReadOptions) -> Result<Vec<Event>, StoreError> {
        query.validate()?;
        let isolation = self.read_isolation(&options);
        self.deadline("read", self.config.query_timeout(), async {
            let mut tx = self.begin(isolation).await?;
            let rows: Vec<EventRow> =
                sql::select_events(query, options.after_position, options.sql_limit())
                    .build_query_as()
                    .fetch_all(&mut *tx)
                    .await?;
            tx.commit().await?;
            let events = rows
                .into_iter()
                .map(Event::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(count = events.len(), "Read events");
            Ok(events)
        })
        .await
    }

    /// Every event sharing a correlation ID, in position order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn events_by_correlation(&self, correlation_id: EventId) -> Result<Vec<Event>, StoreError> {
        self.trace_lookup("correlation_id", correlation_id).await
    }

    /// Every event directly caused by `causation_id`, in position order.
    ///
    /// An event that starts a chain is its own cause and is included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn events_caused_by(&self, causation_id: EventId) -> Result<Vec<Event>, StoreError> {
        self.trace_lookup("causation_id", causation_id).await
    }

    async fn trace_lookup(&self, column: &'static str, id: EventId) -> Result<Vec<Event>, StoreError> {
        let statement = format!(
            "SELECT {} FROM events WHERE {column} = $1 ORDER BY position ASC",
            sql::EVENT_COLUMNS
        );
        let rows: Vec<EventRow> = sqlx::query_as(&statement)
            .bind(id.into_inner())
            .fetch_all(self.pool.pool())
            .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    /// Begin a transaction at `isolation`.
    pub(crate) async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.pool().begin().await?;
        sqlx::query(isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub(crate) fn read_isolation(&self, options: &ReadOptions) -> IsolationLevel {
        options
            .isolation
            .unwrap_or(self.config.default_read_isolation)
    }

    pub(crate) fn fetch_size(&self, options: &ReadOptions) -> u32 {
        options
            .batch_size
            .filter(|size| *size > 0)
            .unwrap_or(self.config.fetch_batch_size)
    }

    /// Run `fut` under a deadline, mapping expiry to [`StoreError::Timeout`].
    ///
    /// On expiry the future is dropped, which rolls back any transaction
    /// it held and returns its connection to the pool.
    pub(crate) async fn deadline<T>(
        &self,
        operation: &'static str,
        limit: Duration,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        with_deadline(operation, limit, fut).await
    }
}

/// Highest position in the log, 0 when empty.
pub(crate) const HEAD_SQL: &str = "SELECT COALESCE(MAX(position), 0)::BIGINT FROM events";

pub(crate) async fn with_deadline<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_elapsed| StoreError::Timeout {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}
