//! `PostgreSQL`-backed event store for Dynamic Consistency Boundaries.
//!
//! Events live in one append-only, globally ordered log. Consistency is
//! enforced per decision rather than per stream: a command projects the
//! state it needs with a query, then appends under an
//! [`AppendCondition`](dcb_types::AppendCondition) that fails if any event
//! matching that query appeared after the position it observed.
//!
//! # Architecture
//!
//! ```text
//! Command handler
//!     |
//!     +-- project_decision_model --> one cursor read over the union query
//!     |       |-- ProjectionLimiter   (fail-fast admission)
//!     |       +-- worker tasks        (projectors fanned out per batch)
//!     |
//!     +-- append_if ---------------> one transaction under a table lock
//!             |-- conflict check     (strictly after the anchor)
//!             +-- UNNEST insert      (consecutive positions)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- The store handle, plain reads, lineage lookups
//! - [`append`] -- Unconditional and conditional appends
//! - [`projection`] -- Projectors and decision models
//! - [`stream`] -- Cursor batches and incremental streaming
//! - [`limiter`] -- Projection admission control
//! - [`lineage`] -- Causation and correlation defaults
//! - [`sql`] -- SQL rendering of queries and conditions
//! - [`row`] -- Row decoding
//! - [`postgres`] -- Connection pool and migrations
//! - [`config`] -- YAML configuration
//! - [`error`] -- Store error type

pub mod append;
pub mod config;
pub mod error;
pub mod limiter;
pub mod lineage;
pub mod postgres;
pub mod projection;
pub mod row;
pub mod sql;
pub mod store;
pub mod stream;

// Re-export primary types for convenience.
pub use append::AppendResult;
pub use config::{ConfigError, DatabaseConfig, DcbConfig, IsolationLevel, StoreConfig};
pub use error::StoreError;
pub use limiter::{ProjectionLimiter, ProjectionPermit};
pub use lineage::Lineage;
pub use postgres::PostgresPool;
pub use projection::ProjectionSet;
pub use row::EventRow;
pub use store::{EventStore, ReadOptions};
pub use stream::EventStream;
