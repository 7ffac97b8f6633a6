//! Operator commands and their argument parsing.
//!
//! ```text
//! dcb-admin migrate
//! dcb-admin head
//! dcb-admin trace <event-id>
//! dcb-admin read [--type <event-type>]... [--tag <key:value>]... [--after <position>] [--limit <n>]
//! ```
//!
//! `read` prints one JSON event per line. A `read` with several `--type`
//! flags matches any of them; several `--tag` flags must all be present.

use std::io::Write;

use clap::{Args, Parser, Subcommand};
use dcb_store::{EventStore, ReadOptions};
use dcb_types::{Event, EventId, Position, Query, QueryItem, Tag};
use futures::StreamExt;
use tracing::info;

/// Operator tool for the DCB event store.
#[derive(Debug, Parser)]
#[command(name = "dcb-admin", version, long_about = None)]
pub struct Cli {
    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Apply pending migrations and exit.
    Migrate,
    /// Print the highest committed position.
    Head,
    /// Print the causation children and correlation group of an event.
    Trace {
        /// The event to trace.
        event_id: EventId,
    },
    /// Dump matching events as JSON lines.
    Read(ReadArgs),
}

/// Filters for `read`.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ReadArgs {
    /// Match this event type; repeat to match any of several.
    #[arg(long = "type", value_name = "EVENT_TYPE")]
    pub types: Vec<String>,

    /// Require this `key:value` tag; repeat to require all of them.
    #[arg(long = "tag", value_name = "KEY:VALUE")]
    pub tags: Vec<Tag>,

    /// Start strictly after this position.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(i64).range(0..))]
    pub after: Position,

    /// Stop after this many events.
    #[arg(long)]
    pub limit: Option<u64>,
}

impl ReadArgs {
    /// The query these filters describe; no filters match every event.
    pub fn query(&self) -> Query {
        let item = QueryItem::new(self.types.clone(), self.tags.clone());
        if item.is_match_all() {
            Query::all()
        } else {
            Query::single(item)
        }
    }

    fn options(&self) -> ReadOptions {
        let options = ReadOptions::default().after(self.after);
        match self.limit {
            Some(limit) => options.with_limit(limit),
            None => options,
        }
    }
}

impl Command {
    /// Run the command against an open store.
    pub async fn run(self, store: &EventStore, out: &mut impl Write) -> anyhow::Result<()> {
        match self {
            // Migrations already ran during startup.
            Self::Migrate => {
                info!("Event log schema is up to date");
            }
            Self::Head => {
                let head = store.head_position().await?;
                writeln!(out, "{head}")?;
            }
            Self::Trace { event_id: id } => {
                let caused = store.events_caused_by(id).await?;
                let correlated = store.events_by_correlation(id).await?;
                info!(
                    event_id = %id,
                    caused = caused.len(),
                    correlated = correlated.len(),
                    "Lineage trace complete"
                );
                let report = serde_json::json!({
                    "event_id": id,
                    "caused": caused,
                    "correlated": correlated,
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            }
            Self::Read(args) => {
                let mut events = store.stream(args.query(), args.options());
                let mut count: u64 = 0;
                while let Some(event) = events.next().await {
                    write_event(out, &event?)?;
                    count = count.saturating_add(1);
                }
                events.close().await;
                info!(count, "Read complete");
            }
        }
        Ok(())
    }
}

fn write_event(out: &mut impl Write, event: &Event) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    writeln!(out)?;
    Ok(())
}
