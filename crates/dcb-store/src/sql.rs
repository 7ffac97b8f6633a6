//! SQL rendering for queries and append conditions.
//!
//! A [`Query`] becomes a parameterized boolean expression over the `events`
//! table. Each item renders as `(type = ANY($n) AND tags @> $m::TEXT[])`,
//! omitting whichever side is unrestricted; items are joined with `OR`.
//! Tag containment uses the GIN index on `tags`.

use dcb_types::tag::encode_tags;
use dcb_types::{AppendCondition, Position, Query};
use sqlx::{Postgres, QueryBuilder};

/// Column list shared by every event `SELECT`.
pub const EVENT_COLUMNS: &str =
    "id, type, tags, data, position, causation_id, correlation_id, created_at";

/// Name of the server-side cursor used in batch mode.
pub const CURSOR_NAME: &str = "dcb_event_cursor";

/// Append the boolean predicate for `query` to `qb`.
pub fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    if query.is_match_all() {
        qb.push("TRUE");
        return;
    }

    qb.push("(");
    for (i, item) in query.items.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        let has_types = !item.event_types.is_empty();
        if has_types {
            qb.push("type = ANY(")
                .push_bind(item.event_types.clone())
                .push("::TEXT[])");
        }
        if !item.tags.is_empty() {
            if has_types {
                qb.push(" AND ");
            }
            qb.push("tags @> ")
                .push_bind(encode_tags(&item.tags))
                .push("::TEXT[]");
        }
        qb.push(")");
    }
    qb.push(")");
}

/// `SELECT` of all events matching `query` after `after`, in position order.
pub fn select_events(
    query: &Query,
    after: Position,
    limit: Option<i64>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("");
    push_select(&mut qb, query, after, limit);
    qb
}

/// `DECLARE` a no-scroll server-side cursor over [`select_events`].
pub fn declare_cursor(
    query: &Query,
    after: Position,
    limit: Option<i64>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("DECLARE ");
    qb.push(CURSOR_NAME).push(" NO SCROLL CURSOR FOR ");
    push_select(&mut qb, query, after, limit);
    qb
}

fn push_select(
    qb: &mut QueryBuilder<'_, Postgres>,
    query: &Query,
    after: Position,
    limit: Option<i64>,
) {
    qb.push("SELECT ")
        .push(EVENT_COLUMNS)
        .push(" FROM events WHERE position > ")
        .push_bind(after)
        .push(" AND ");
    push_predicate(qb, query);
    qb.push(" ORDER BY position ASC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
}

/// `FETCH FORWARD n` from the batch-mode cursor.
pub fn fetch_forward(batch_size: u32) -> String {
    format!("FETCH FORWARD {batch_size} FROM {CURSOR_NAME}")
}

/// Early-terminating existence check for an append condition.
///
/// `EXISTS` stops at the first matching row, so a violated condition
/// never scans past the first conflict.
pub fn conflict_check(condition: &AppendCondition) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT EXISTS (SELECT 1 FROM events WHERE position > ");
    qb.push_bind(condition.after_position).push(" AND ");
    push_predicate(&mut qb, &condition.fail_if_events_match);
    qb.push(")");
    qb
}
