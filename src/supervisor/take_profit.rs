//! Take profit: close the full position once price reaches the target.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::engine::TradingEngine;
use crate::error::Result;
use crate::model::{Position, PositionSide, Strategy, StrategyConfig, StrategyType};

use super::executor::{config_mismatch, place_closing_order, StrategyExecutor};

pub struct TakeProfitExecutor {
    engine: Arc<TradingEngine>,
}

impl TakeProfitExecutor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StrategyExecutor for TakeProfitExecutor {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TakeProfit
    }

    fn update(&self, _strategy: &mut Strategy, _position: &Position, _price: Decimal) -> Result<bool> {
        Ok(false)
    }

    fn check(&self, strategy: &Strategy, position: &Position, current_price: Decimal) -> Result<bool> {
        let StrategyConfig::TakeProfit { target_price } = &strategy.config else {
            return Err(config_mismatch(StrategyType::TakeProfit));
        };

        Ok(match position.side {
            PositionSide::Long => current_price >= *target_price,
            PositionSide::Short => current_price <= *target_price,
        })
    }

    async fn execute(
        &self,
        _strategy: &mut Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<()> {
        info!(
            position_id = %position.id,
            price = %current_price,
            "Executing take profit"
        );
        place_closing_order(&self.engine, position, position.quantity).await?;
        Ok(())
    }
}
