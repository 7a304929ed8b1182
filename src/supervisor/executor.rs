//! Executor contract: one pluggable evaluator per strategy type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::engine::{PlaceOrderRequest, TradingEngine};
use crate::error::{Result, TradingError};
use crate::model::{Order, OrderSide, OrderType, Position, PositionSide, Strategy, StrategyType};

use super::oco::OcoExecutor;
use super::scale_out::ScaleOutExecutor;
use super::stop_loss::StopLossExecutor;
use super::take_profit::TakeProfitExecutor;
use super::time_based::TimeBasedExitExecutor;
use super::trailing_stop::TrailingStopExecutor;

/// Evaluates and fires one strategy type.
///
/// `update` advances any internal state (e.g. a trailing stop's high-water
/// mark) and reports whether the config changed so the supervisor can
/// persist it. `check` is the trigger predicate. `execute` places the
/// closing order(s) through the trading engine; for scale-out it may fire a
/// subset of levels and leave the strategy active.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    fn update(
        &self,
        strategy: &mut Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<bool>;

    fn check(
        &self,
        strategy: &Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<bool>;

    async fn execute(
        &self,
        strategy: &mut Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<()>;
}

/// Place a market order closing `quantity` of the position. The order side
/// opposes the position side and the order carries the position id, so its
/// fills flow back through reconciliation and shrink the position.
pub(crate) async fn place_closing_order(
    engine: &Arc<TradingEngine>,
    position: &Position,
    quantity: Decimal,
) -> Result<Vec<Order>> {
    let side = match position.side {
        PositionSide::Long => OrderSide::Ask,
        PositionSide::Short => OrderSide::Bid,
    };

    engine
        .place_order(
            position.user_id,
            PlaceOrderRequest {
                market: position.market.clone(),
                side,
                order_type: OrderType::Market,
                price: None,
                quantity,
                position_id: Some(position.id),
                split_count: 1,
            },
        )
        .await
}

pub(crate) fn config_mismatch(expected: StrategyType) -> TradingError {
    TradingError::Validation(format!(
        "strategy config does not match executor type {}",
        expected.as_str()
    ))
}

/// Executor lookup by strategy type.
pub struct ExecutorRegistry {
    executors: HashMap<StrategyType, Arc<dyn StrategyExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// A registry with every built-in executor wired to `engine`.
    pub fn with_defaults(engine: Arc<TradingEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StopLossExecutor::new(engine.clone())));
        registry.register(Arc::new(TakeProfitExecutor::new(engine.clone())));
        registry.register(Arc::new(TrailingStopExecutor::new(engine.clone())));
        registry.register(Arc::new(OcoExecutor::new(engine.clone())));
        registry.register(Arc::new(ScaleOutExecutor::new(engine.clone())));
        registry.register(Arc::new(TimeBasedExitExecutor::new(engine)));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn StrategyExecutor>) {
        self.executors.insert(executor.strategy_type(), executor);
    }

    pub fn get(&self, strategy_type: StrategyType) -> Option<Arc<dyn StrategyExecutor>> {
        self.executors.get(&strategy_type).cloned()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
