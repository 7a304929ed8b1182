//! Time-based exit: close the full position once the scheduled time passes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::engine::TradingEngine;
use crate::error::Result;
use crate::model::{Position, Strategy, StrategyConfig, StrategyType};

use super::executor::{config_mismatch, place_closing_order, StrategyExecutor};

pub struct TimeBasedExitExecutor {
    engine: Arc<TradingEngine>,
}

impl TimeBasedExitExecutor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StrategyExecutor for TimeBasedExitExecutor {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TimeBasedExit
    }

    fn update(&self, _strategy: &mut Strategy, _position: &Position, _price: Decimal) -> Result<bool> {
        Ok(false)
    }

    fn check(&self, strategy: &Strategy, _position: &Position, _price: Decimal) -> Result<bool> {
        let StrategyConfig::TimeBasedExit { exit_time } = &strategy.config else {
            return Err(config_mismatch(StrategyType::TimeBasedExit));
        };
        Ok(Utc::now() >= *exit_time)
    }

    async fn execute(
        &self,
        strategy: &mut Strategy,
        position: &Position,
        _price: Decimal,
    ) -> Result<()> {
        let StrategyConfig::TimeBasedExit { exit_time } = &strategy.config else {
            return Err(config_mismatch(StrategyType::TimeBasedExit));
        };

        info!(
            position_id = %position.id,
            exit_time = %exit_time,
            "Executing time-based exit"
        );
        place_closing_order(&self.engine, position, position.quantity).await?;
        Ok(())
    }
}
