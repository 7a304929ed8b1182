//! Scale out: staged partial exits across multiple price levels.
//!
//! Each level sizes its exit as a percentage of the position's original
//! quantity. Reached levels execute in directional order (ascending price
//! for a long, descending for a short) and the strategy stays active until
//! every level has fired.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::engine::TradingEngine;
use crate::error::Result;
use crate::model::{Position, PositionSide, Strategy, StrategyConfig, StrategyType};
use crate::utils::decimal::EPSILON;

use super::executor::{config_mismatch, place_closing_order, StrategyExecutor};

pub struct ScaleOutExecutor {
    engine: Arc<TradingEngine>,
}

impl ScaleOutExecutor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self { engine }
    }
}

fn level_reached(side: PositionSide, level_price: Decimal, current_price: Decimal) -> bool {
    match side {
        PositionSide::Long => current_price >= level_price,
        PositionSide::Short => current_price <= level_price,
    }
}

#[async_trait]
impl StrategyExecutor for ScaleOutExecutor {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::ScaleOut
    }

    fn update(&self, _strategy: &mut Strategy, _position: &Position, _price: Decimal) -> Result<bool> {
        Ok(false)
    }

    fn check(&self, strategy: &Strategy, position: &Position, current_price: Decimal) -> Result<bool> {
        let StrategyConfig::ScaleOut { levels } = &strategy.config else {
            return Err(config_mismatch(StrategyType::ScaleOut));
        };

        Ok(levels
            .iter()
            .any(|level| !level.executed && level_reached(position.side, level.price, current_price)))
    }

    /// Fire every reached, unexecuted level. A level whose closing order
    /// cannot be placed is left unexecuted and retried on a later tick.
    async fn execute(
        &self,
        strategy: &mut Strategy,
        position: &Position,
        current_price: Decimal,
    ) -> Result<()> {
        let StrategyConfig::ScaleOut { levels } = &mut strategy.config else {
            return Err(config_mismatch(StrategyType::ScaleOut));
        };

        let mut order: Vec<usize> = (0..levels.len())
            .filter(|&i| {
                !levels[i].executed && level_reached(position.side, levels[i].price, current_price)
            })
            .collect();
        match position.side {
            PositionSide::Long => order.sort_by(|&a, &b| levels[a].price.cmp(&levels[b].price)),
            PositionSide::Short => order.sort_by(|&a, &b| levels[b].price.cmp(&levels[a].price)),
        }

        let mut remaining = position.quantity;
        for index in order {
            let level = &levels[index];
            let target = position.initial_quantity * level.percentage / dec!(100);
            let quantity = target.min(remaining);

            if quantity > EPSILON {
                info!(
                    position_id = %position.id,
                    level = index + 1,
                    level_price = %level.price,
                    percentage = %level.percentage,
                    quantity = %quantity,
                    price = %current_price,
                    "Executing scale-out level"
                );

                if let Err(e) = place_closing_order(&self.engine, position, quantity).await {
                    warn!(
                        position_id = %position.id,
                        level = index + 1,
                        error = %e,
                        "Failed to place scale-out order; level will retry"
                    );
                    continue;
                }
                remaining -= quantity;
            }

            levels[index].executed = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_reached_directional() {
        assert!(level_reached(PositionSide::Long, dec!(110), dec!(111)));
        assert!(!level_reached(PositionSide::Long, dec!(110), dec!(109)));
        assert!(level_reached(PositionSide::Short, dec!(90), dec!(89)));
        assert!(!level_reached(PositionSide::Short, dec!(90), dec!(91)));
    }
}
