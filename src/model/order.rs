//! Orders and their append-only execution records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::decimal::EPSILON;

/// Order side: bid buys, ask sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Bid,
    Ask,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Bid => "bid",
            OrderSide::Ask => "ask",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bid" => Some(OrderSide::Bid),
            "ask" => Some(OrderSide::Ask),
            _ => None,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "limit" => Some(OrderType::Limit),
            "market" => Some(OrderType::Market),
            _ => None,
        }
    }
}

/// Order lifecycle status.
///
/// Pending → Submitted → Partial → Filled/Cancelled, or Pending → Failed
/// when the exchange rejects the submission. Cancelled, Filled and Failed
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Partial,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "submitted" => Some(OrderStatus::Submitted),
            "partial" => Some(OrderStatus::Partial),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }
}

/// A single submission intent against the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Position whose quantity this order's fills flow into, if any.
    pub position_id: Option<Uuid>,
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price; None for market orders.
    pub price: Option<Decimal>,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Cumulative executed quantity observed so far.
    pub executed_quantity: Decimal,
    pub status: OrderStatus,
    /// Exchange-assigned id; None until submission succeeds. Immutable once
    /// set.
    pub exchange_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a new pending order.
    pub fn new(
        user_id: Uuid,
        market: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            position_id: None,
            market: market.into(),
            side,
            order_type,
            price,
            quantity,
            executed_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            exchange_order_id: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            filled_at: None,
        }
    }

    /// Whether the order can still be cancelled.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Submitted)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record successful exchange acceptance.
    pub fn mark_submitted(&mut self, exchange_order_id: String) {
        let now = Utc::now();
        self.exchange_order_id = Some(exchange_order_id);
        self.status = OrderStatus::Submitted;
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self) {
        self.status = OrderStatus::Failed;
        self.updated_at = Utc::now();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    /// Mark the order fully filled, stamping `filled_at` once.
    pub fn mark_filled(&mut self) {
        let now = Utc::now();
        if self.status != OrderStatus::Filled {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Apply a newly observed execution delta.
    ///
    /// Coerces the status to Filled once the cumulative executed quantity
    /// reaches the requested quantity (within [`EPSILON`]), even when the
    /// exchange has not yet reported a terminal state; marks Partial while
    /// the order is in flight. Terminal statuses other than Filled are never
    /// overwritten, so a final fill reported alongside a cancel leaves the
    /// order Cancelled.
    pub fn record_fill(&mut self, delta: Decimal) {
        self.executed_quantity += delta;
        self.updated_at = Utc::now();

        if self.executed_quantity >= self.quantity - EPSILON {
            if !self.is_terminal() {
                self.mark_filled();
            }
        } else if self.executed_quantity > Decimal::ZERO && !self.is_terminal() {
            self.status = OrderStatus::Partial;
        }
    }
}

/// An immutable fill record. One row is appended per observed positive delta
/// in an order's executed quantity.
///
/// The execution price is the price reported by the exchange's order
/// response, which for limit orders is the order price rather than a
/// per-trade average; see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExecution {
    pub id: Uuid,
    pub order_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    /// Price × quantity.
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderExecution {
    pub fn new(order_id: Uuid, price: Decimal, quantity: Decimal, fee: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            price,
            quantity,
            fee,
            total: price * quantity,
            created_at: Utc::now(),
        }
    }
}
