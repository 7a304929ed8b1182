//! Position: an open directional exposure for one (user, market) pair.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::decimal::{safe_div, EPSILON};

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PositionStatus::Open),
            "closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

/// Direction of a position. Long profits on price rise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

/// A trading position.
///
/// `entry_price` is the quantity-weighted mean of all buy fills applied to
/// the position. `quantity` never goes negative; once it falls to within
/// [`EPSILON`] of zero the position closes and stays closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Market symbol, e.g. "KRW-BTC".
    pub market: String,
    pub side: PositionSide,
    pub status: PositionStatus,
    /// Average entry price across all fills.
    pub entry_price: Decimal,
    /// Current quantity.
    pub quantity: Decimal,
    pub initial_quantity: Decimal,
    pub realized_pnl: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a new open position.
    pub fn new(
        user_id: Uuid,
        market: impl Into<String>,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            market: market.into(),
            side,
            status: PositionStatus::Open,
            entry_price,
            quantity,
            initial_quantity: quantity,
            realized_pnl: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized profit/loss of the current snapshot at `current_price`.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (current_price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - current_price) * self.quantity,
        }
    }

    /// Apply an entry fill: grow the quantity and recompute the weighted
    /// average entry price.
    pub fn increase(&mut self, additional_qty: Decimal, price: Decimal) {
        let total_value = self.entry_price * self.quantity + price * additional_qty;
        self.quantity += additional_qty;
        self.entry_price = safe_div(total_value, self.quantity);
        self.updated_at = Utc::now();
    }

    /// Apply an exit fill: accumulate realized P&L and shrink the quantity,
    /// closing the position when the remainder is negligible.
    ///
    /// Callers must ensure `qty` does not exceed the current quantity beyond
    /// [`EPSILON`]; the store enforces this before mutating.
    pub fn reduce(&mut self, qty: Decimal, exit_price: Decimal) {
        let pnl = match self.side {
            PositionSide::Long => (exit_price - self.entry_price) * qty,
            PositionSide::Short => (self.entry_price - exit_price) * qty,
        };

        self.realized_pnl += pnl;
        self.quantity -= qty;
        if self.quantity < Decimal::ZERO {
            self.quantity = Decimal::ZERO;
        }
        self.updated_at = Utc::now();

        if self.quantity <= EPSILON {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position(entry: Decimal, qty: Decimal) -> Position {
        Position::new(Uuid::new_v4(), "KRW-BTC", PositionSide::Long, entry, qty)
    }

    #[test]
    fn test_increase_recomputes_weighted_entry() {
        let mut pos = long_position(dec!(100), dec!(1));
        pos.increase(dec!(1), dec!(200));

        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.entry_price, dec!(150));
    }

    #[test]
    fn test_increase_from_zero_quantity() {
        let mut pos = long_position(dec!(100), Decimal::ZERO);
        pos.increase(dec!(3), dec!(100));

        assert_eq!(pos.quantity, dec!(3));
        assert_eq!(pos.entry_price, dec!(100));
    }

    #[test]
    fn test_reduce_accumulates_long_pnl() {
        let mut pos = long_position(dec!(100), dec!(2));
        pos.reduce(dec!(1), dec!(110));

        assert_eq!(pos.realized_pnl, dec!(10));
        assert_eq!(pos.quantity, dec!(1));
        assert!(pos.is_open());
    }

    #[test]
    fn test_reduce_short_pnl_is_inverted() {
        let mut pos = Position::new(
            Uuid::new_v4(),
            "KRW-ETH",
            PositionSide::Short,
            dec!(100),
            dec!(2),
        );
        pos.reduce(dec!(2), dec!(90));

        assert_eq!(pos.realized_pnl, dec!(20));
        assert_eq!(pos.status, PositionStatus::Closed);
    }

    #[test]
    fn test_full_reduce_closes_and_stamps() {
        let mut pos = long_position(dec!(100), dec!(1));
        pos.reduce(dec!(1), dec!(107));

        assert_eq!(pos.status, PositionStatus::Closed);
        assert!(pos.closed_at.is_some());
        assert_eq!(pos.realized_pnl, dec!(7));
        assert_eq!(pos.quantity, Decimal::ZERO);
    }

    #[test]
    fn test_residual_below_epsilon_closes() {
        let mut pos = long_position(dec!(100), dec!(1));
        pos.reduce(dec!(0.999999995), dec!(100));

        assert_eq!(pos.status, PositionStatus::Closed);
        assert!(pos.quantity >= Decimal::ZERO);
    }

    #[test]
    fn test_unrealized_pnl_both_sides() {
        let long = long_position(dec!(100), dec!(2));
        assert_eq!(long.unrealized_pnl(dec!(110)), dec!(20));

        let short = Position::new(
            Uuid::new_v4(),
            "KRW-BTC",
            PositionSide::Short,
            dec!(100),
            dec!(2),
        );
        assert_eq!(short.unrealized_pnl(dec!(110)), dec!(-20));
    }
}
