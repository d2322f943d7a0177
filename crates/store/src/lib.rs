//! Storage backend implementations for Lens.
//!
//! Three families behind one [`lens_core::Store`] trait:
//!
//! - [`sqlite`]  — embedded single-file row store for dev and small
//!   deployments; ACID, single writer behind WAL.
//! - [`postgres`] — networked row store with JSON-typed columns and a
//!   bounded connection pool; the production default.
//! - [`clickhouse`] — columnar analytics store; replacing merges for
//!   mutable entities, plain append for spans.
//!
//! The connection string's scheme selects the family; anything that is not
//! a recognized URL is treated as a SQLite file path.

pub mod clickhouse;
pub mod postgres;
pub mod sqlite;

pub use self::clickhouse::ClickHouseStore;
pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use lens_core::{Store, StoreError};
use std::sync::Arc;

/// Pool sizing passed through to networked backends.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            min_connections: 5,
            max_connections: 25,
        }
    }
}

/// Which backend family a connection string selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
    ClickHouse,
}

/// Classify a connection string by its URL scheme.
pub fn backend_kind(url: &str) -> BackendKind {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        BackendKind::Postgres
    } else if url.starts_with("clickhouse://") || url.starts_with("clickhouses://") {
        BackendKind::ClickHouse
    } else {
        // `sqlite://...` and bare file paths both land here.
        BackendKind::Sqlite
    }
}

/// Open the store selected by `url` and run its migrations.
pub async fn connect(url: &str, options: ConnectOptions) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match backend_kind(url) {
        BackendKind::Sqlite => Arc::new(SqliteStore::open(url).await?),
        BackendKind::Postgres => Arc::new(PostgresStore::connect(url, options).await?),
        BackendKind::ClickHouse => Arc::new(ClickHouseStore::connect(url)?),
    };
    store.migrate().await?;
    tracing::info!(backend = store.name(), "store initialized");
    Ok(store)
}
