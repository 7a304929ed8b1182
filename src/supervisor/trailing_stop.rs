//! Trailing stop: the trigger follows favorable price motion but never
//! moves against the position.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::engine::TradingEngine;
use crate::error::Result;
use crate::model::{Position, PositionSide, Strategy, StrategyConfig, StrategyType};

use super::executor::{config_mismatch, place_closing_order, StrategyExecutor};

pub struct TrailingStopExecutor {
    engine: Arc<TradingEngine>,
}

impl TrailingStopExecutor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StrategyExecutor for TrailingStopExecutor {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TrailingStop
    }

    /// Ratchet the observed extreme and recompute the trigger. For a long
    /// position the trigger trails the highest observed price by
    /// `trail_percent`; for a short position it trails the lowest.
    fn update(
        &self,
        strategy: &mut Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<bool> {
        let StrategyConfig::TrailingStop {
            trail_percent,
            highest_price,
            lowest_price,
            trigger_price,
        } = &mut strategy.config
        else {
            return Err(config_mismatch(StrategyType::TrailingStop));
        };

        match position.side {
            PositionSide::Long => {
                if highest_price.map_or(true, |high| current_price > high) {
                    *highest_price = Some(current_price);
                    let trigger = current_price * (Decimal::ONE - *trail_percent / dec!(100));
                    *trigger_price = Some(trigger);
                    debug!(
                        position_id = %position.id,
                        highest = %current_price,
                        trigger = %trigger,
                        "Trailing stop ratcheted"
                    );
                    return Ok(true);
                }
            }
            PositionSide::Short => {
                if lowest_price.map_or(true, |low| current_price < low) {
                    *lowest_price = Some(current_price);
                    let trigger = current_price * (Decimal::ONE + *trail_percent / dec!(100));
                    *trigger_price = Some(trigger);
                    debug!(
                        position_id = %position.id,
                        lowest = %current_price,
                        trigger = %trigger,
                        "Trailing stop ratcheted"
                    );
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn check(&self, strategy: &Strategy, position: &Position, current_price: Decimal) -> Result<bool> {
        let StrategyConfig::TrailingStop { trigger_price, .. } = &strategy.config else {
            return Err(config_mismatch(StrategyType::TrailingStop));
        };
        let Some(trigger) = trigger_price else {
            return Ok(false);
        };

        Ok(match position.side {
            PositionSide::Long => current_price <= *trigger,
            PositionSide::Short => current_price >= *trigger,
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
            "Executing trailing stop"
        );
        place_closing_order(&self.engine, position, position.quantity).await?;
        Ok(())
    }
}
