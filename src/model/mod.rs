//! Domain models: positions, orders, executions, and exit strategies.

mod order;
mod position;
mod strategy;

pub use order::{Order, OrderExecution, OrderSide, OrderStatus, OrderType};
pub use position::{Position, PositionSide, PositionStatus};
pub use strategy::{ScaleOutLevel, Strategy, StrategyConfig, StrategyStatus, StrategyType};
