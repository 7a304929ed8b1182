//! Position store: the authoritative quantity and realized P&L of every
//! position, with invariant-preserving mutation operations.

use std::sync::Arc;

use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TradingError};
use crate::model::{Position, PositionSide, PositionStatus};
use crate::store::{column_datetime, column_decimal, column_uuid, conversion_error, opt_rfc3339, Db};
use crate::utils::decimal::EPSILON;

/// Durable record plus in-memory mutation semantics of positions.
///
/// `increase`/`reduce` are serialized per position: the weighted-average
/// entry formula and the quantity invariant both require that no two fills
/// mutate the same position concurrently.
pub struct PositionStore {
    db: Arc<Db>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PositionStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, position_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(position_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a new open position. Fails with a conflict if the user already
    /// has an open position in this market.
    pub fn create(
        &self,
        user_id: Uuid,
        market: &str,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
    ) -> Result<Position> {
        if market.is_empty() {
            return Err(TradingError::Validation("market must not be empty".into()));
        }
        if entry_price < Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "entry price must not be negative, got {entry_price}"
            )));
        }
        if quantity < Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "quantity must not be negative, got {quantity}"
            )));
        }

        let position = Position::new(user_id, market, side, entry_price, quantity);

        // Check-then-insert runs in one critical section on the connection,
        // so two racing creates for the same market cannot both pass.
        self.db.with(|conn| {
            let existing = query_open_by_market(conn, user_id, market)?;
            if existing.is_some() {
                return Ok(None);
            }
            insert_position(conn, &position)?;
            Ok(Some(()))
        })?
        .ok_or_else(|| {
            TradingError::Conflict(format!("an open position already exists for {market}"))
        })?;

        info!(
            position_id = %position.id,
            user_id = %user_id,
            market = %market,
            side = %side.as_str(),
            quantity = %quantity,
            "Position created"
        );
        Ok(position)
    }

    pub fn get(&self, position_id: Uuid) -> Result<Position> {
        self.db
            .with(|conn| query_position(conn, position_id))?
            .ok_or_else(|| TradingError::not_found("position", position_id))
    }

    /// Fetch a position, verifying ownership.
    pub fn get_owned(&self, user_id: Uuid, position_id: Uuid) -> Result<Position> {
        let position = self.get(position_id)?;
        if position.user_id != user_id {
            return Err(TradingError::Unauthorized(
                "position does not belong to user".into(),
            ));
        }
        Ok(position)
    }

    pub fn get_by_user(&self, user_id: Uuid) -> Result<Vec<Position>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM positions WHERE user_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id.to_string()], position_from_row)?;
            rows.collect()
        })
    }

    /// The open position for (user, market), if any. Used by the creation
    /// guard.
    pub fn get_open_by_market(&self, user_id: Uuid, market: &str) -> Result<Option<Position>> {
        self.db.with(|conn| query_open_by_market(conn, user_id, market))
    }

    /// Grow a position by an entry fill, recomputing the weighted-average
    /// entry price. Serialized per position.
    pub async fn increase(&self, position_id: Uuid, qty: Decimal, price: Decimal) -> Result<Position> {
        if qty <= Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "increase quantity must be positive, got {qty}"
            )));
        }

        let lock = self.lock_for(position_id);
        let _guard = lock.lock().await;

        let mut position = self.get(position_id)?;
        if !position.is_open() {
            return Err(TradingError::Conflict(
                "cannot increase a closed position".into(),
            ));
        }

        position.increase(qty, price);
        self.db.with(|conn| update_position(conn, &position))?;
        Ok(position)
    }

    /// Shrink a position by an exit fill, accumulating realized P&L and
    /// closing the position when the remainder is negligible. Serialized per
    /// position.
    pub async fn reduce(
        &self,
        position_id: Uuid,
        qty: Decimal,
        exit_price: Decimal,
    ) -> Result<Position> {
        if qty <= Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "reduce quantity must be positive, got {qty}"
            )));
        }

        let lock = self.lock_for(position_id);
        let _guard = lock.lock().await;

        let mut position = self.get(position_id)?;
        if !position.is_open() {
            return Err(TradingError::Conflict(
                "cannot reduce a closed position".into(),
            ));
        }
        if qty > position.quantity + EPSILON {
            return Err(TradingError::InsufficientQuantity {
                requested: qty,
                available: position.quantity,
            });
        }

        position.reduce(qty, exit_price);
        self.db.with(|conn| update_position(conn, &position))?;

        if !position.is_open() {
            info!(
                position_id = %position.id,
                realized_pnl = %position.realized_pnl,
                "Position closed"
            );
        }
        Ok(position)
    }
}

fn insert_position(conn: &Connection, p: &Position) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO positions (id, user_id, market, side, status, entry_price, quantity,
                               initial_quantity, realized_pnl, created_at, updated_at, closed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            p.id.to_string(),
            p.user_id.to_string(),
            p.market,
            p.side.as_str(),
            p.status.as_str(),
            p.entry_price.to_string(),
            p.quantity.to_string(),
            p.initial_quantity.to_string(),
            p.realized_pnl.to_string(),
            p.created_at.to_rfc3339(),
            p.updated_at.to_rfc3339(),
            opt_rfc3339(&p.closed_at),
        ],
    )?;
    Ok(())
}

fn update_position(conn: &Connection, p: &Position) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        UPDATE positions
        SET status = ?2, entry_price = ?3, quantity = ?4, realized_pnl = ?5,
            updated_at = ?6, closed_at = ?7
        WHERE id = ?1
        "#,
        params![
            p.id.to_string(),
            p.status.as_str(),
            p.entry_price.to_string(),
            p.quantity.to_string(),
            p.realized_pnl.to_string(),
            p.updated_at.to_rfc3339(),
            opt_rfc3339(&p.closed_at),
        ],
    )?;
    Ok(())
}

fn query_position(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<Position>> {
    conn.query_row(
        "SELECT * FROM positions WHERE id = ?1",
        params![id.to_string()],
        position_from_row,
    )
    .optional()
}

fn query_open_by_market(
    conn: &Connection,
    user_id: Uuid,
    market: &str,
) -> rusqlite::Result<Option<Position>> {
    conn.query_row(
        "SELECT * FROM positions WHERE user_id = ?1 AND market = ?2 AND status = 'open'",
        params![user_id.to_string(), market],
        position_from_row,
    )
    .optional()
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    let side: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Position {
        id: column_uuid(0, &row.get::<_, String>(0)?)?,
        user_id: column_uuid(1, &row.get::<_, String>(1)?)?,
        market: row.get(2)?,
        side: PositionSide::parse(&side).ok_or_else(|| conversion_error(3, "side", &side))?,
        status: PositionStatus::parse(&status)
            .ok_or_else(|| conversion_error(4, "status", &status))?,
        entry_price: column_decimal(5, &row.get::<_, String>(5)?)?,
        quantity: column_decimal(6, &row.get::<_, String>(6)?)?,
        initial_quantity: column_decimal(7, &row.get::<_, String>(7)?)?,
        realized_pnl: column_decimal(8, &row.get::<_, String>(8)?)?,
        created_at: column_datetime(9, &row.get::<_, String>(9)?)?,
        updated_at: column_datetime(10, &row.get::<_, String>(10)?)?,
        closed_at: row
            .get::<_, Option<String>>(11)?
            .map(|s| column_datetime(11, &s))
            .transpose()?,
    })
}
