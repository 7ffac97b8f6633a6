//! `PostgreSQL` connection pool and schema migrations.
//!
//! One pool is opened at startup and shared by handle with every
//! [`EventStore`] clone. Each pooled session is tagged with the configured
//! `application_name`, so store traffic is easy to pick out of
//! `pg_stat_activity` and `pg_locks` when an append is stuck on the log
//! lock. An optional `statement_timeout` is applied the same way, as a
//! startup parameter, so it holds before the first query on a session.
//!
//! [`EventStore`]: crate::EventStore

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::{ConfigError, DatabaseConfig};
use crate::error::StoreError;

/// Build the per-session connect options for `config`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the URL cannot be parsed.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, ConfigError> {
    let options: PgConnectOptions =
        config
            .url
            .parse()
            .map_err(|e: sqlx::Error| ConfigError::Invalid {
                field: "database.url",
                reason: e.to_string(),
            })?;
    let options = options.application_name(&config.application_name);
    Ok(match config.statement_timeout_ms {
        Some(ms) => options.options([("statement_timeout", format!("{ms}ms"))]),
        None => options,
    })
}

/// Pool options derived from the sizing half of `config`.
fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout())
}

/// Connection pool handle to `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Validate `config` and open the pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for a bad URL or pool size, or
    /// [`StoreError::Postgres`] if the first connection fails.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let pool = pool_options(config)
            .connect_with(connect_options(config)?)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            application_name = %config.application_name,
            statement_timeout_ms = ?config.statement_timeout_ms,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Open the pool without connecting; sessions are made on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for a bad URL or pool size.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let pool = pool_options(config).connect_lazy_with(connect_options(config)?);
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `events` table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// The underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool once checked-out connections come back.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}
