//! Order store: thin persistence for orders and their executions.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{Result, TradingError};
use crate::model::{Order, OrderExecution, OrderSide, OrderStatus, OrderType};
use crate::store::{column_datetime, column_decimal, column_uuid, conversion_error, opt_rfc3339, Db};

/// Durable record of orders and their executions. All state transitions are
/// computed by the trading engine and written through.
pub struct OrderStore {
    db: Arc<Db>,
}

impl OrderStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn create(&self, order: &Order) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                r#"
                INSERT INTO orders (id, user_id, position_id, market, side, order_type, price,
                                    quantity, executed_quantity, status, exchange_order_id,
                                    created_at, updated_at, submitted_at, filled_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
                params![
                    order.id.to_string(),
                    order.user_id.to_string(),
                    order.position_id.map(|id| id.to_string()),
                    order.market,
                    order.side.as_str(),
                    order.order_type.as_str(),
                    order.price.map(|p| p.to_string()),
                    order.quantity.to_string(),
                    order.executed_quantity.to_string(),
                    order.status.as_str(),
                    order.exchange_order_id,
                    order.created_at.to_rfc3339(),
                    order.updated_at.to_rfc3339(),
                    opt_rfc3339(&order.submitted_at),
                    opt_rfc3339(&order.filled_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn update(&self, order: &Order) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                r#"
                UPDATE orders
                SET executed_quantity = ?2, status = ?3, exchange_order_id = ?4,
                    updated_at = ?5, submitted_at = ?6, filled_at = ?7
                WHERE id = ?1
                "#,
                params![
                    order.id.to_string(),
                    order.executed_quantity.to_string(),
                    order.status.as_str(),
                    order.exchange_order_id,
                    order.updated_at.to_rfc3339(),
                    opt_rfc3339(&order.submitted_at),
                    opt_rfc3339(&order.filled_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, order_id: Uuid) -> Result<Order> {
        self.db
            .with(|conn| {
                conn.query_row(
                    "SELECT * FROM orders WHERE id = ?1",
                    params![order_id.to_string()],
                    order_from_row,
                )
                .optional()
            })?
            .ok_or_else(|| TradingError::not_found("order", order_id))
    }

    pub fn get_by_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.query_orders(
            "SELECT * FROM orders WHERE user_id = ?1 ORDER BY created_at DESC",
            user_id.to_string(),
        )
    }

    pub fn get_by_position(&self, position_id: Uuid) -> Result<Vec<Order>> {
        self.query_orders(
            "SELECT * FROM orders WHERE position_id = ?1 ORDER BY created_at",
            position_id.to_string(),
        )
    }

    pub fn get_by_exchange_id(&self, exchange_order_id: &str) -> Result<Option<Order>> {
        self.db.with(|conn| {
            conn.query_row(
                "SELECT * FROM orders WHERE exchange_order_id = ?1",
                params![exchange_order_id],
                order_from_row,
            )
            .optional()
        })
    }

    /// All non-terminal orders for a user.
    pub fn get_pending(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM orders
                 WHERE user_id = ?1 AND status IN ('pending', 'submitted', 'partial')
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![user_id.to_string()], order_from_row)?;
            rows.collect()
        })
    }

    /// Append an immutable fill record.
    pub fn append_execution(&self, execution: &OrderExecution) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                r#"
                INSERT INTO order_executions (id, order_id, price, quantity, fee, total, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    execution.id.to_string(),
                    execution.order_id.to_string(),
                    execution.price.to_string(),
                    execution.quantity.to_string(),
                    execution.fee.to_string(),
                    execution.total.to_string(),
                    execution.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn executions(&self, order_id: Uuid) -> Result<Vec<OrderExecution>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM order_executions WHERE order_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![order_id.to_string()], execution_from_row)?;
            rows.collect()
        })
    }

    fn query_orders(&self, sql: &str, key: String) -> Result<Vec<Order>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![key], order_from_row)?;
            rows.collect()
        })
    }
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let side: String = row.get(4)?;
    let order_type: String = row.get(5)?;
    let status: String = row.get(9)?;
    Ok(Order {
        id: column_uuid(0, &row.get::<_, String>(0)?)?,
        user_id: column_uuid(1, &row.get::<_, String>(1)?)?,
        position_id: row
            .get::<_, Option<String>>(2)?
            .map(|s| column_uuid(2, &s))
            .transpose()?,
        market: row.get(3)?,
        side: OrderSide::parse(&side).ok_or_else(|| conversion_error(4, "side", &side))?,
        order_type: OrderType::parse(&order_type)
            .ok_or_else(|| conversion_error(5, "order type", &order_type))?,
        price: row
            .get::<_, Option<String>>(6)?
            .map(|s| column_decimal(6, &s))
            .transpose()?,
        quantity: column_decimal(7, &row.get::<_, String>(7)?)?,
        executed_quantity: column_decimal(8, &row.get::<_, String>(8)?)?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| conversion_error(9, "status", &status))?,
        exchange_order_id: row.get(10)?,
        created_at: column_datetime(11, &row.get::<_, String>(11)?)?,
        updated_at: column_datetime(12, &row.get::<_, String>(12)?)?,
        submitted_at: row
            .get::<_, Option<String>>(13)?
            .map(|s| column_datetime(13, &s))
            .transpose()?,
        filled_at: row
            .get::<_, Option<String>>(14)?
            .map(|s| column_datetime(14, &s))
            .transpose()?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<OrderExecution> {
    Ok(OrderExecution {
        id: column_uuid(0, &row.get::<_, String>(0)?)?,
        order_id: column_uuid(1, &row.get::<_, String>(1)?)?,
        price: column_decimal(2, &row.get::<_, String>(2)?)?,
        quantity: column_decimal(3, &row.get::<_, String>(3)?)?,
        fee: column_decimal(4, &row.get::<_, String>(4)?)?,
        total: column_decimal(5, &row.get::<_, String>(5)?)?,
        created_at: column_datetime(6, &row.get::<_, String>(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn store() -> OrderStore {
        OrderStore::new(Db::open_in_memory().unwrap())
    }

    fn sample_order(user_id: Uuid) -> Order {
        let mut order = Order::new(
            user_id,
            "KRW-BTC",
            OrderSide::Bid,
            OrderType::Limit,
            dec!(1.5),
            Some(dec!(100)),
        );
        order.position_id = Some(Uuid::new_v4());
        order
    }

    #[test]
    fn test_create_get_round_trip() {
        let store = store();
        let order = sample_order(Uuid::new_v4());
        store.create(&order).unwrap();

        let loaded = store.get(order.id).unwrap();
        assert_eq!(loaded.market, "KRW-BTC");
        assert_eq!(loaded.quantity, dec!(1.5));
        assert_eq!(loaded.price, Some(dec!(100)));
        assert_eq!(loaded.position_id, order.position_id);
        assert_eq!(loaded.status, OrderStatus::Pending);
    }

    #[test]
    fn test_update_reflects_submission() {
        let store = store();
        let mut order = sample_order(Uuid::new_v4());
        store.create(&order).unwrap();

        order.mark_submitted("upbit-uuid-1".to_string());
        store.update(&order).unwrap();

        let loaded = store.get(order.id).unwrap();
        assert_eq!(loaded.status, OrderStatus::Submitted);
        assert_eq!(loaded.exchange_order_id.as_deref(), Some("upbit-uuid-1"));
        assert!(loaded.submitted_at.is_some());

        let by_exchange = store.get_by_exchange_id("upbit-uuid-1").unwrap();
        assert_eq!(by_exchange.unwrap().id, order.id);
    }

    #[test]
    fn test_get_pending_excludes_terminal() {
        let store = store();
        let user = Uuid::new_v4();

        let mut filled = sample_order(user);
        filled.mark_filled();
        store.create(&filled).unwrap();

        let open = sample_order(user);
        store.create(&open).unwrap();

        let pending = store.get_pending(user).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open.id);
    }

    #[test]
    fn test_executions_append_only() {
        let store = store();
        let order = sample_order(Uuid::new_v4());
        store.create(&order).unwrap();

        store
            .append_execution(&OrderExecution::new(order.id, dec!(100), dec!(0.5), Decimal::ZERO))
            .unwrap();
        store
            .append_execution(&OrderExecution::new(order.id, dec!(101), dec!(1), Decimal::ZERO))
            .unwrap();

        let executions = store.executions(order.id).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].total, dec!(50));
        assert_eq!(executions[1].total, dec!(101));
    }

    #[test]
    fn test_get_by_position_orders_chronologically() {
        let store = store();
        let user = Uuid::new_v4();
        let position_id = Uuid::new_v4();

        for _ in 0..3 {
            let mut order = sample_order(user);
            order.position_id = Some(position_id);
            store.create(&order).unwrap();
        }

        assert_eq!(store.get_by_position(position_id).unwrap().len(), 3);
        assert_eq!(store.get_by_user(user).unwrap().len(), 3);
    }
}
