//! Exit strategies bound to positions.
//!
//! A strategy's behavior is fully described by its [`StrategyConfig`]
//! variant; the variant tag doubles as the strategy type and as the tag of
//! the serialized form stored in the database.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TradingError};

/// Strategy type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Oco,
    ScaleOut,
    TimeBasedExit,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::StopLoss => "stop_loss",
            StrategyType::TakeProfit => "take_profit",
            StrategyType::TrailingStop => "trailing_stop",
            StrategyType::Oco => "oco",
            StrategyType::ScaleOut => "scale_out",
            StrategyType::TimeBasedExit => "time_based_exit",
        }
    }
}

/// Strategy lifecycle status. Active is the only status the supervisor
/// evaluates; Triggered, Cancelled and Completed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Active,
    Triggered,
    Cancelled,
    Completed,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Active => "active",
            StrategyStatus::Triggered => "triggered",
            StrategyStatus::Cancelled => "cancelled",
            StrategyStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(StrategyStatus::Active),
            "triggered" => Some(StrategyStatus::Triggered),
            "cancelled" => Some(StrategyStatus::Cancelled),
            "completed" => Some(StrategyStatus::Completed),
            _ => None,
        }
    }
}

/// One exit level of a scale-out strategy. `percentage` is the share of the
/// position quantity to close at this level, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleOutLevel {
    pub price: Decimal,
    pub percentage: Decimal,
    #[serde(default)]
    pub executed: bool,
}

/// Typed per-strategy configuration. Serialized as a JSON union tagged by
/// `type`, matching the stored schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    StopLoss {
        stop_price: Decimal,
    },
    TakeProfit {
        target_price: Decimal,
    },
    TrailingStop {
        trail_percent: Decimal,
        #[serde(skip_serializing_if = "Option::is_none")]
        highest_price: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lowest_price: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        trigger_price: Option<Decimal>,
    },
    Oco {
        stop_price: Decimal,
        target_price: Decimal,
    },
    ScaleOut {
        levels: Vec<ScaleOutLevel>,
    },
    TimeBasedExit {
        exit_time: DateTime<Utc>,
    },
}

impl StrategyConfig {
    /// The strategy type this configuration describes.
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyConfig::StopLoss { .. } => StrategyType::StopLoss,
            StrategyConfig::TakeProfit { .. } => StrategyType::TakeProfit,
            StrategyConfig::TrailingStop { .. } => StrategyType::TrailingStop,
            StrategyConfig::Oco { .. } => StrategyType::Oco,
            StrategyConfig::ScaleOut { .. } => StrategyType::ScaleOut,
            StrategyConfig::TimeBasedExit { .. } => StrategyType::TimeBasedExit,
        }
    }

    /// A fresh trailing stop with no observed extremes yet.
    pub fn trailing_stop(trail_percent: Decimal) -> Self {
        StrategyConfig::TrailingStop {
            trail_percent,
            highest_price: None,
            lowest_price: None,
            trigger_price: None,
        }
    }

    /// Validate the configuration at creation/update time.
    pub fn validate(&self) -> Result<()> {
        match self {
            StrategyConfig::StopLoss { stop_price } => {
                ensure_positive("stop_price", *stop_price)?;
            }
            StrategyConfig::TakeProfit { target_price } => {
                ensure_positive("target_price", *target_price)?;
            }
            StrategyConfig::TrailingStop { trail_percent, .. } => {
                if *trail_percent <= Decimal::ZERO || *trail_percent > dec!(100) {
                    return Err(TradingError::Validation(format!(
                        "trail_percent must be in (0, 100], got {trail_percent}"
                    )));
                }
            }
            StrategyConfig::Oco {
                stop_price,
                target_price,
            } => {
                ensure_positive("stop_price", *stop_price)?;
                ensure_positive("target_price", *target_price)?;
            }
            StrategyConfig::ScaleOut { levels } => {
                if levels.is_empty() {
                    return Err(TradingError::Validation(
                        "scale_out requires at least one level".to_string(),
                    ));
                }
                for level in levels {
                    ensure_positive("level price", level.price)?;
                    if level.percentage <= Decimal::ZERO || level.percentage > dec!(100) {
                        return Err(TradingError::Validation(format!(
                            "level percentage must be in (0, 100], got {}",
                            level.percentage
                        )));
                    }
                }
            }
            StrategyConfig::TimeBasedExit { .. } => {}
        }
        Ok(())
    }
}

fn ensure_positive(name: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(TradingError::Validation(format!(
            "{name} must be positive, got {value}"
        )));
    }
    Ok(())
}

/// A declarative exit rule bound to a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub position_id: Uuid,
    pub status: StrategyStatus,
    pub config: StrategyConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

impl Strategy {
    pub fn new(position_id: Uuid, config: StrategyConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            position_id,
            status: StrategyStatus::Active,
            config,
            created_at: now,
            updated_at: now,
            triggered_at: None,
        }
    }

    pub fn strategy_type(&self) -> StrategyType {
        self.config.strategy_type()
    }

    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    pub fn trigger(&mut self) {
        let now = Utc::now();
        self.status = StrategyStatus::Triggered;
        self.triggered_at = Some(now);
        self.updated_at = now;
    }

    pub fn cancel(&mut self) {
        self.status = StrategyStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = StrategyStatus::Completed;
        self.updated_at = Utc::now();
    }
}
