//! OCO: a stop and a target armed together. A single market close covers
//! whichever arm fires; the close is atomic against the position, so there
//! is no residual order to cancel.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::engine::TradingEngine;
use crate::error::Result;
use crate::model::{Position, PositionSide, Strategy, StrategyConfig, StrategyType};

use super::executor::{config_mismatch, place_closing_order, StrategyExecutor};

pub struct OcoExecutor {
    engine: Arc<TradingEngine>,
}

impl OcoExecutor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StrategyExecutor for OcoExecutor {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Oco
    }

    fn update(&self, _strategy: &mut Strategy, _position: &Position, _price: Decimal) -> Result<bool> {
        Ok(false)
    }

    fn check(&self, strategy: &Strategy, position: &Position, current_price: Decimal) -> Result<bool> {
        let StrategyConfig::Oco {
            stop_price,
            target_price,
        } = &strategy.config
        else {
            return Err(config_mismatch(StrategyType::Oco));
        };

        Ok(match position.side {
            PositionSide::Long => current_price <= *stop_price || current_price >= *target_price,
            PositionSide::Short => current_price >= *stop_price || current_price <= *target_price,
        })
    }

    async fn execute(
        &self,
        strategy: &mut Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<()> {
        let StrategyConfig::Oco { stop_price, .. } = &strategy.config else {
            return Err(config_mismatch(StrategyType::Oco));
        };

        let stop_hit = match position.side {
            PositionSide::Long => current_price <= *stop_price,
            PositionSide::Short => current_price >= *stop_price,
        };
        let arm = if stop_hit { "stop" } else { "target" };

        info!(
            position_id = %position.id,
            price = %current_price,
            arm,
            "Executing OCO close"
        );
        place_closing_order(&self.engine, position, position.quantity).await?;
        Ok(())
    }
}
