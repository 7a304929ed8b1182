//! SQLite-backed persistence for positions, orders, executions, strategies
//! and exchange credentials.
//!
//! All monetary values are stored as TEXT-encoded decimals and timestamps as
//! RFC 3339 strings. The stores hold no business logic beyond the position
//! mutation invariants; state transitions are computed by the engine and the
//! supervisor and written through.

mod credentials;
mod orders;
mod positions;
mod strategies;

pub use credentials::{ApiCredential, CredentialStore};
pub use orders::OrderStore;
pub use positions::PositionStore;
pub use strategies::StrategyStore;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;

/// Shared SQLite handle. A single connection guarded by a mutex; every
/// store call runs inside one critical section, which also makes
/// check-then-insert guards atomic.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let conn = Connection::open(path.as_ref())?;
        let db = Arc::new(Self {
            conn: Mutex::new(conn),
        });
        db.init_schema()?;
        info!(path = ?path.as_ref(), "Database opened");
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory()?;
        let db = Arc::new(Self {
            conn: Mutex::new(conn),
        });
        db.init_schema()?;
        Ok(db)
    }

    /// Run `f` with the connection locked.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        Ok(f(&conn)?)
    }

    fn init_schema(&self) -> Result<()> {
        self.with(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS positions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    market TEXT NOT NULL,
                    side TEXT NOT NULL,
                    status TEXT NOT NULL,
                    entry_price TEXT NOT NULL,
                    quantity TEXT NOT NULL,
                    initial_quantity TEXT NOT NULL,
                    realized_pnl TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    closed_at TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_positions_user_market
                    ON positions(user_id, market, status);

                CREATE TABLE IF NOT EXISTS orders (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    position_id TEXT,
                    market TEXT NOT NULL,
                    side TEXT NOT NULL,
                    order_type TEXT NOT NULL,
                    price TEXT,
                    quantity TEXT NOT NULL,
                    executed_quantity TEXT NOT NULL,
                    status TEXT NOT NULL,
                    exchange_order_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    submitted_at TEXT,
                    filled_at TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);
                CREATE INDEX IF NOT EXISTS idx_orders_position ON orders(position_id);
                CREATE INDEX IF NOT EXISTS idx_orders_exchange ON orders(exchange_order_id);

                CREATE TABLE IF NOT EXISTS order_executions (
                    id TEXT PRIMARY KEY,
                    order_id TEXT NOT NULL,
                    price TEXT NOT NULL,
                    quantity TEXT NOT NULL,
                    fee TEXT NOT NULL,
                    total TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_executions_order
                    ON order_executions(order_id);

                CREATE TABLE IF NOT EXISTS strategies (
                    id TEXT PRIMARY KEY,
                    position_id TEXT NOT NULL,
                    strategy_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    config TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    triggered_at TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_strategies_position
                    ON strategies(position_id);
                CREATE INDEX IF NOT EXISTS idx_strategies_status
                    ON strategies(status);

                CREATE TABLE IF NOT EXISTS api_credentials (
                    user_id TEXT NOT NULL,
                    access_key TEXT NOT NULL,
                    secret_key TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, access_key)
                );
                "#,
            )
        })
    }
}

// Column codecs shared by the stores.

pub(crate) fn conversion_error(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unrecognized {what}: {raw}").into(),
    )
}

pub(crate) fn column_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| conversion_error(idx, "uuid", raw))
}

pub(crate) fn column_decimal(idx: usize, raw: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(raw).map_err(|_| conversion_error(idx, "decimal", raw))
}

pub(crate) fn column_datetime(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| conversion_error(idx, "timestamp", raw))
}

pub(crate) fn opt_rfc3339(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}
