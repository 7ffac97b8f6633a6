//! Streaming reads: cursor batches and incremental channel delivery.
//!
//! Both modes run the same ordered `SELECT` (see [`crate::sql`]) and so
//! yield identical event sequences for the same query and snapshot.
//!
//! - **Batch mode** ([`EventStore::read_batches`]) declares a server-side
//!   `NO SCROLL` cursor and pulls `FETCH FORWARD n` at a time. Peak memory
//!   is one batch. Suited to large result sets and to the projection
//!   engine.
//! - **Incremental mode** ([`EventStore::stream`]) streams rows from the
//!   backend one at a time on a producer task and hands each event over a
//!   bounded channel. Lower latency per event, more scheduling overhead.
//!
//! Early exit is always safe. Dropping a batch stream drops its
//! transaction, which rolls back and closes the cursor. Dropping an
//! [`EventStream`] closes the channel and aborts the producer, which
//! releases its connection the same way.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use dcb_types::{Event, Position, Query};
use futures::stream::{BoxStream, Stream, StreamExt};
use sqlx::{Postgres, Transaction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::row::EventRow;
use crate::sql;
use crate::store::{EventStore, ReadOptions, with_deadline};

/// An open server-side cursor and the transaction that owns it.
pub(crate) struct Cursor {
    tx: Transaction<'static, Postgres>,
    fetch_timeout: Duration,
}

impl Cursor {
    /// Declare the cursor inside `tx`.
    pub(crate) async fn declare(
        mut tx: Transaction<'static, Postgres>,
        query: &Query,
        after: Position,
        limit: Option<i64>,
        fetch_timeout: Duration,
    ) -> Result<Self, StoreError> {
        // The cursor only lives for this transaction; don't cache the plan.
        sql::declare_cursor(query, after, limit)
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await?;
        Ok(Self { tx, fetch_timeout })
    }

    /// Fetch up to `batch_size` rows; an empty batch means exhausted.
    pub(crate) async fn fetch(&mut self, batch_size: u32) -> Result<Vec<Event>, StoreError> {
        let statement = sql::fetch_forward(batch_size);
        let tx = &mut self.tx;
        let rows: Vec<EventRow> = with_deadline("fetch", self.fetch_timeout, async {
            Ok(sqlx::query_as(&statement)
                .persistent(false)
                .fetch_all(&mut **tx)
                .await?)
        })
        .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    /// Close the cursor and end the read transaction.
    pub(crate) async fn close(mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("CLOSE {}", sql::CURSOR_NAME))
            .execute(&mut *self.tx)
            .await?;
        self.tx.commit().await?;
        Ok(())
    }
}

/// Progress of a batch-mode read.
enum BatchState {
    Unopened {
        store: EventStore,
        query: Query,
        options: ReadOptions,
    },
    Open(Cursor),
    Exhausted,
}

impl EventStore {
    /// Read matching events as a stream of position-ordered batches.
    ///
    /// Each item holds at most `batch_size` events (`store.fetch_batch_size`
    /// unless overridden). Each fetch is bounded by `query_timeout`.
    pub fn read_batches(
        &self,
        query: Query,
        options: ReadOptions,
    ) -> BoxStream<'static, Result<Vec<Event>, StoreError>> {
        let batch_size = self.fetch_size(&options);
        let initial = BatchState::Unopened {
            store: self.clone(),
            query,
            options,
        };

        futures::stream::try_unfold(initial, move |state| async move {
            let mut cursor = match state {
                BatchState::Unopened {
                    store,
                    query,
                    options,
                } => store.open_cursor(&query, &options).await?,
                BatchState::Open(cursor) => cursor,
                BatchState::Exhausted => return Ok(None),
            };

            let batch = cursor.fetch(batch_size).await?;
            if batch.is_empty() {
                cursor.close().await?;
                return Ok(None);
            }
            let next = if batch.len() < usize::try_from(batch_size).unwrap_or(usize::MAX) {
                cursor.close().await?;
                BatchState::Exhausted
            } else {
                BatchState::Open(cursor)
            };
            tracing::debug!(count = batch.len(), "Fetched event batch");
            Ok(Some((batch, next)))
        })
        .boxed()
    }

    /// Read matching events one at a time over a bounded channel.
    ///
    /// The channel holds `store.stream_buffer` events; a slow consumer
    /// applies backpressure to the producer. Must be called from within a
    /// Tokio runtime.
    pub fn stream(&self, query: Query, options: ReadOptions) -> EventStream {
        let (sender, receiver) = mpsc::channel(self.config().stream_buffer);
        let store = self.clone();
        let producer = tokio::spawn(async move {
            if let Err(e) = produce(&store, &query, &options, &sender).await {
                // The consumer may already be gone; nothing else to tell.
                let _ = sender.send(Err(e)).await;
            }
        });
        EventStream {
            receiver,
            producer: Some(producer),
        }
    }

    /// Begin a read transaction and declare a cursor for `query`.
    pub(crate) async fn open_cursor(
        &self,
        query: &Query,
        options: &ReadOptions,
    ) -> Result<Cursor, StoreError> {
        query.validate()?;
        let tx = self.begin(self.read_isolation(options)).await?;
        Cursor::declare(
            tx,
            query,
            options.after_position,
            options.sql_limit(),
            self.config().query_timeout(),
        )
        .await
    }
}

/// Producer side of incremental mode.
async fn produce(
    store: &EventStore,
    query: &Query,
    options: &ReadOptions,
    sender: &mpsc::Sender<Result<Event, StoreError>>,
) -> Result<(), StoreError> {
    query.validate()?;
    let row_timeout = store.config().query_timeout();
    let mut tx = store.begin(store.read_isolation(options)).await?;
    let mut delivered: usize = 0;
    let mut abandoned = false;

    {
        let mut builder = sql::select_events(query, options.after_position, options.sql_limit());
        let mut rows = builder.build_query_as::<EventRow>().fetch(&mut *tx);

        loop {
            let next = tokio::select! {
                () = sender.closed() => {
                    abandoned = true;
                    break;
                }
                next = with_deadline("stream", row_timeout, async { Ok(rows.next().await) }) => next?,
            };
            let Some(row) = next else { break };
            let event = Event::try_from(row?)?;
            if sender.send(Ok(event)).await.is_err() {
                abandoned = true;
                break;
            }
            delivered = delivered.saturating_add(1);
        }
    }

    if abandoned {
        tx.rollback().await?;
        tracing::debug!(delivered, "Event stream closed early by consumer");
    } else {
        tx.commit().await?;
        tracing::debug!(delivered, "Event stream exhausted");
    }
    Ok(())
}

/// Incremental-mode event stream.
///
/// Implements [`Stream`]. Dropping it before exhaustion stops the producer
/// and releases the backend connection.
pub struct EventStream {
    receiver: mpsc::Receiver<Result<Event, StoreError>>,
    producer: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Receive the next event, or `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Option<Result<Event, StoreError>> {
        self.receiver.recv().await
    }

    /// Stop reading and wait for the producer to release its connection.
    pub async fn close(mut self) {
        self.receiver.close();
        // Drain anything already buffered so a blocked send wakes up.
        while self.receiver.recv().await.is_some() {}
        if let Some(producer) = self.producer.take() {
            let _ = producer.await;
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Event, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(producer) = &self.producer {
            producer.abort();
        }
    }
}
