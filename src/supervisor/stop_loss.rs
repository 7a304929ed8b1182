//! Stop loss: close the full position once price moves against it past the
//! stop.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::engine::TradingEngine;
use crate::error::Result;
use crate::model::{Position, PositionSide, Strategy, StrategyConfig, StrategyType};

use super::executor::{config_mismatch, place_closing_order, StrategyExecutor};

pub struct StopLossExecutor {
    engine: Arc<TradingEngine>,
}

impl StopLossExecutor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StrategyExecutor for StopLossExecutor {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::StopLoss
    }

    fn update(&self, _strategy: &mut Strategy, _position: &Position, _price: Decimal) -> Result<bool> {
        Ok(false)
    }

    fn check(&self, strategy: &Strategy, position: &Position, current_price: Decimal) -> Result<bool> {
        let StrategyConfig::StopLoss { stop_price } = &strategy.config else {
            return Err(config_mismatch(StrategyType::StopLoss));
        };

        Ok(match position.side {
            PositionSide::Long => current_price <= *stop_price,
            PositionSide::Short => current_price >= *stop_price,
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
            "Executing stop loss"
        );
        place_closing_order(&self.engine, position, position.quantity).await?;
        Ok(())
    }
}
