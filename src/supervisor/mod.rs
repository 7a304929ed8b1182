//! Strategy supervisor: drives every active exit strategy against live
//! prices and fires the trading engine when one triggers.
//!
//! Dispatch is open to extension: each strategy type is handled by a
//! registered [`StrategyExecutor`], keyed by the config's type tag.

mod executor;
mod oco;
mod scale_out;
mod stop_loss;
mod take_profit;
mod time_based;
mod trailing_stop;

pub use executor::{ExecutorRegistry, StrategyExecutor};
pub use oco::OcoExecutor;
pub use scale_out::ScaleOutExecutor;
pub use stop_loss::StopLossExecutor;
pub use take_profit::TakeProfitExecutor;
pub use time_based::TimeBasedExitExecutor;
pub use trailing_stop::TrailingStopExecutor;

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::error::{Result, TradingError};
use crate::exchange::MarketPriceSource;
use crate::model::{Strategy, StrategyConfig, StrategyType};
use crate::store::{PositionStore, StrategyStore};

/// Active-strategy scheduler plus strategy management operations.
pub struct StrategySupervisor {
    strategies: Arc<StrategyStore>,
    positions: Arc<PositionStore>,
    prices: Arc<dyn MarketPriceSource>,
    registry: ExecutorRegistry,
    config: SupervisorConfig,
}

impl StrategySupervisor {
    pub fn new(
        strategies: Arc<StrategyStore>,
        positions: Arc<PositionStore>,
        prices: Arc<dyn MarketPriceSource>,
        registry: ExecutorRegistry,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            strategies,
            positions,
            prices,
            registry,
            config,
        }
    }

    /// Run the evaluation loop until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.eval_interval());
        info!("Strategy supervisor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.evaluate_all().await,
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Strategy supervisor stopped");
    }

    /// One evaluation pass over every active strategy, fanned out
    /// concurrently under a bounded cap.
    pub async fn evaluate_all(self: &Arc<Self>) {
        let strategies = match self.strategies.get_active() {
            Ok(strategies) => strategies,
            Err(e) => {
                error!(error = %e, "Failed to load active strategies");
                return;
            }
        };
        if strategies.is_empty() {
            return;
        }
        debug!(count = strategies.len(), "Evaluating active strategies");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_evals));
        let mut handles = Vec::with_capacity(strategies.len());

        for strategy in strategies {
            let supervisor = Arc::clone(self);
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let strategy_id = strategy.id;
                if let Err(e) = supervisor.evaluate_strategy(strategy).await {
                    warn!(
                        strategy_id = %strategy_id,
                        error = %e,
                        "Strategy evaluation failed; will retry next tick"
                    );
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Evaluate one strategy: reconcile against its position, advance its
    /// state, and fire it when its predicate holds.
    async fn evaluate_strategy(self: &Arc<Self>, mut strategy: Strategy) -> Result<()> {
        let Some(executor) = self.registry.get(strategy.strategy_type()) else {
            // Configuration problem; skip without cancelling user intent.
            warn!(
                strategy_id = %strategy.id,
                strategy_type = strategy.strategy_type().as_str(),
                "No executor registered; skipping strategy"
            );
            return Ok(());
        };

        let position = self.positions.get(strategy.position_id)?;
        if !position.is_open() {
            strategy.complete();
            self.strategies.update(&strategy)?;
            info!(
                strategy_id = %strategy.id,
                position_id = %position.id,
                "Strategy completed: position closed"
            );
            return Ok(());
        }

        let current_price = match self.prices.current_price(&position.market).await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    strategy_id = %strategy.id,
                    market = %position.market,
                    error = %e,
                    "Price unavailable; skipping strategy this tick"
                );
                return Ok(());
            }
        };

        if executor.update(&mut strategy, &position, current_price)? {
            self.strategies.update(&strategy)?;
        }

        if !executor.check(&strategy, &position, current_price)? {
            return Ok(());
        }

        info!(
            strategy_id = %strategy.id,
            position_id = %position.id,
            strategy_type = strategy.strategy_type().as_str(),
            price = %current_price,
            "Strategy triggered"
        );
        executor.execute(&mut strategy, &position, current_price).await?;

        // Scale-out stays active across partial triggers until every level
        // has fired; everything else is one-shot.
        match &strategy.config {
            StrategyConfig::ScaleOut { levels } => {
                if levels.iter().all(|level| level.executed) {
                    strategy.complete();
                }
            }
            _ => strategy.trigger(),
        }
        self.strategies.update(&strategy)?;
        Ok(())
    }

    /// Create a strategy on an open position the user owns.
    ///
    /// Trailing stops are initialized with the current price so a freshly
    /// armed stop has a defined trigger before its first evaluation tick.
    pub async fn create_strategy(
        &self,
        user_id: Uuid,
        position_id: Uuid,
        config: StrategyConfig,
    ) -> Result<Strategy> {
        config.validate()?;

        let position = self.positions.get_owned(user_id, position_id)?;
        if !position.is_open() {
            return Err(TradingError::Conflict(
                "cannot create strategy for closed position".into(),
            ));
        }

        let strategy_type = config.strategy_type();
        let Some(executor) = self.registry.get(strategy_type) else {
            return Err(TradingError::UnsupportedStrategy(
                strategy_type.as_str().to_string(),
            ));
        };

        let duplicate = self
            .strategies
            .get_by_position(position_id)?
            .into_iter()
            .any(|s| s.is_active() && s.strategy_type() == strategy_type);
        if duplicate {
            return Err(TradingError::Conflict(format!(
                "an active {} strategy already exists for this position",
                strategy_type.as_str()
            )));
        }

        let mut strategy = Strategy::new(position_id, config);

        if strategy_type == StrategyType::TrailingStop {
            let current_price = self
                .prices
                .current_price(&position.market)
                .await
                .map_err(|e| TradingError::PriceUnavailable {
                    market: position.market.clone(),
                    reason: e.to_string(),
                })?;
            executor.update(&mut strategy, &position, current_price)?;
        }

        self.strategies.create(&strategy)?;
        info!(
            strategy_id = %strategy.id,
            position_id = %position_id,
            strategy_type = strategy_type.as_str(),
            "Strategy created"
        );
        Ok(strategy)
    }

    /// Fetch a strategy, verifying the user owns its position.
    pub fn get_strategy(&self, user_id: Uuid, strategy_id: Uuid) -> Result<Strategy> {
        let strategy = self.strategies.get(strategy_id)?;
        self.positions.get_owned(user_id, strategy.position_id)?;
        Ok(strategy)
    }

    pub fn get_position_strategies(&self, user_id: Uuid, position_id: Uuid) -> Result<Vec<Strategy>> {
        self.positions.get_owned(user_id, position_id)?;
        self.strategies.get_by_position(position_id)
    }

    pub fn cancel_strategy(&self, user_id: Uuid, strategy_id: Uuid) -> Result<Strategy> {
        let mut strategy = self.get_strategy(user_id, strategy_id)?;
        if !strategy.is_active() {
            return Err(TradingError::Conflict("strategy is not active".into()));
        }

        strategy.cancel();
        self.strategies.update(&strategy)?;
        info!(strategy_id = %strategy_id, "Strategy cancelled");
        Ok(strategy)
    }

    /// Replace an active strategy's configuration. The new config must be of
    /// the same type.
    pub fn update_strategy_config(
        &self,
        user_id: Uuid,
        strategy_id: Uuid,
        config: StrategyConfig,
    ) -> Result<Strategy> {
        config.validate()?;

        let mut strategy = self.get_strategy(user_id, strategy_id)?;
        if !strategy.is_active() {
            return Err(TradingError::Conflict("cannot update inactive strategy".into()));
        }
        if config.strategy_type() != strategy.strategy_type() {
            return Err(TradingError::Validation(format!(
                "config type {} does not match strategy type {}",
                config.strategy_type().as_str(),
                strategy.strategy_type().as_str()
            )));
        }

        strategy.config = config;
        strategy.updated_at = chrono::Utc::now();
        self.strategies.update(&strategy)?;
        info!(strategy_id = %strategy_id, "Strategy config updated");
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::TradingEngine;
    use crate::exchange::{MockConnector, MockExchange, MockPriceSource, OrderState};
    use crate::model::{
        OrderStatus, PositionSide, PositionStatus, ScaleOutLevel, StrategyStatus,
    };
    use crate::store::{CredentialStore, Db, OrderStore};
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        supervisor: Arc<StrategySupervisor>,
        engine: Arc<TradingEngine>,
        exchange: Arc<MockExchange>,
        prices: Arc<MockPriceSource>,
        orders: Arc<OrderStore>,
        positions: Arc<PositionStore>,
        strategies: Arc<StrategyStore>,
        user: Uuid,
    }

    fn harness() -> Harness {
        let db = Db::open_in_memory().unwrap();
        let orders = Arc::new(OrderStore::new(db.clone()));
        let positions = Arc::new(PositionStore::new(db.clone()));
        let strategies = Arc::new(StrategyStore::new(db.clone()));
        let credentials = Arc::new(CredentialStore::new(db));

        let exchange = MockExchange::new();
        let connector = MockConnector::new(exchange.clone());
        let prices = MockPriceSource::new();

        let user = Uuid::new_v4();
        credentials.set_active(user, "access", "secret").unwrap();

        let engine = Arc::new(TradingEngine::new(
            orders.clone(),
            positions.clone(),
            credentials,
            connector,
            EngineConfig::default(),
        ));
        let registry = ExecutorRegistry::with_defaults(engine.clone());
        let supervisor = Arc::new(StrategySupervisor::new(
            strategies.clone(),
            positions.clone(),
            prices.clone(),
            registry,
            SupervisorConfig::default(),
        ));

        Harness {
            supervisor,
            engine,
            exchange,
            prices,
            orders,
            positions,
            strategies,
            user,
        }
    }

    /// Wait for every order on the position to be accepted, then report each
    /// as fully executed and reconcile so the fills reach the position.
    async fn fill_position_orders(h: &Harness, position_id: Uuid, price: Decimal) {
        let orders = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let orders = h.orders.get_by_position(position_id).unwrap();
                let open: Vec<_> = orders
                    .into_iter()
                    .filter(|o| !o.is_terminal())
                    .collect();
                if !open.is_empty() && open.iter().all(|o| o.status == OrderStatus::Submitted) {
                    return open;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for submissions");

        for order in &orders {
            let exchange_id = order.exchange_order_id.clone().unwrap();
            h.exchange
                .report(&exchange_id, OrderState::Done, order.quantity, Some(price))
                .await;
        }
        h.engine.reconcile_all().await;
    }

    #[tokio::test]
    async fn test_trailing_stop_ratchets_and_triggers() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();

        h.prices.set_price("KRW-BTC", dec!(100));
        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::trailing_stop(dec!(10)),
            )
            .await
            .unwrap();

        // Armed immediately: highest 100, trigger 90.
        let StrategyConfig::TrailingStop {
            highest_price,
            trigger_price,
            ..
        } = strategy.config
        else {
            panic!("expected trailing stop");
        };
        assert_eq!(highest_price, Some(dec!(100)));
        assert_eq!(trigger_price, Some(dec!(90)));

        // Tick 1 at 100: no trigger.
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );

        // Tick 2 at 120: ratchet to trigger 108.
        h.prices.set_price("KRW-BTC", dec!(120));
        h.supervisor.evaluate_all().await;
        let stored = h.strategies.get(strategy.id).unwrap();
        let StrategyConfig::TrailingStop { trigger_price, .. } = stored.config else {
            panic!("expected trailing stop");
        };
        assert_eq!(trigger_price, Some(dec!(108)));
        assert_eq!(stored.status, StrategyStatus::Active);

        // Tick 3 at 107: breach; a full-quantity market ask fires.
        h.prices.set_price("KRW-BTC", dec!(107));
        h.supervisor.evaluate_all().await;
        let stored = h.strategies.get(strategy.id).unwrap();
        assert_eq!(stored.status, StrategyStatus::Triggered);
        assert!(stored.triggered_at.is_some());

        // The closing fill flows back through reconciliation.
        fill_position_orders(&h, position.id, dec!(107)).await;

        let position = h.positions.get(position.id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.quantity, Decimal::ZERO);
        assert_eq!(position.realized_pnl, dec!(7));
    }

    #[tokio::test]
    async fn test_oco_target_hit_closes_position() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(2))
            .unwrap();

        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::Oco {
                    stop_price: dec!(90),
                    target_price: dec!(120),
                },
            )
            .await
            .unwrap();

        h.prices.set_price("KRW-BTC", dec!(121));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Triggered
        );

        fill_position_orders(&h, position.id, dec!(121)).await;

        let position = h.positions.get(position.id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.realized_pnl, dec!(42));
    }

    #[tokio::test]
    async fn test_scale_out_fires_levels_across_ticks() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(10))
            .unwrap();

        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::ScaleOut {
                    levels: vec![
                        ScaleOutLevel {
                            price: dec!(110),
                            percentage: dec!(30),
                            executed: false,
                        },
                        ScaleOutLevel {
                            price: dec!(120),
                            percentage: dec!(30),
                            executed: false,
                        },
                        ScaleOutLevel {
                            price: dec!(130),
                            percentage: dec!(40),
                            executed: false,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        // Below every level: nothing fires.
        h.prices.set_price("KRW-BTC", dec!(105));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );
        assert!(h.orders.get_by_position(position.id).unwrap().is_empty());

        // Level 1 fires 30% of the original 10.
        h.prices.set_price("KRW-BTC", dec!(111));
        h.supervisor.evaluate_all().await;
        fill_position_orders(&h, position.id, dec!(111)).await;
        let stored = h.strategies.get(strategy.id).unwrap();
        assert_eq!(stored.status, StrategyStatus::Active);
        assert_eq!(h.positions.get(position.id).unwrap().quantity, dec!(7));

        // Level 2.
        h.prices.set_price("KRW-BTC", dec!(125));
        h.supervisor.evaluate_all().await;
        fill_position_orders(&h, position.id, dec!(125)).await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );
        assert_eq!(h.positions.get(position.id).unwrap().quantity, dec!(4));

        // Level 3 completes the strategy and empties the position.
        h.prices.set_price("KRW-BTC", dec!(132));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Completed
        );
        fill_position_orders(&h, position.id, dec!(132)).await;

        let position = h.positions.get(position.id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);

        let ask_quantities: Vec<Decimal> = h
            .orders
            .get_by_position(position.id)
            .unwrap()
            .iter()
            .map(|o| o.quantity)
            .collect();
        assert_eq!(ask_quantities, vec![dec!(3), dec!(3), dec!(4)]);
    }

    #[tokio::test]
    async fn test_scale_out_over_allocation_never_oversells() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(10))
            .unwrap();

        // Levels sum to 160% of the position.
        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::ScaleOut {
                    levels: vec![
                        ScaleOutLevel {
                            price: dec!(110),
                            percentage: dec!(80),
                            executed: false,
                        },
                        ScaleOutLevel {
                            price: dec!(120),
                            percentage: dec!(80),
                            executed: false,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        // Both levels reached at once; the second is clamped to what is
        // left.
        h.prices.set_price("KRW-BTC", dec!(125));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Completed
        );

        let quantities: Vec<Decimal> = h
            .orders
            .get_by_position(position.id)
            .unwrap()
            .iter()
            .map(|o| o.quantity)
            .collect();
        assert_eq!(quantities, vec![dec!(8), dec!(2)]);

        fill_position_orders(&h, position.id, dec!(125)).await;
        let position = h.positions.get(position.id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert!(position.quantity >= Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_strategy_on_closed_position_completes() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();
        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(90),
                },
            )
            .await
            .unwrap();

        // The position closes out of band.
        h.positions.reduce(position.id, dec!(1), dec!(100)).await.unwrap();

        h.prices.set_price("KRW-BTC", dec!(100));
        h.supervisor.evaluate_all().await;

        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_price_outage_skips_tick_and_stays_active() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();
        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(90),
                },
            )
            .await
            .unwrap();

        // No price scripted: the evaluation skips without failing.
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );

        // Price returns below the stop: fires.
        h.prices.set_price("KRW-BTC", dec!(89));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Triggered
        );
    }

    #[tokio::test]
    async fn test_time_based_exit_fires_after_deadline() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();

        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::TimeBasedExit {
                    exit_time: Utc::now() + ChronoDuration::hours(1),
                },
            )
            .await
            .unwrap();

        h.prices.set_price("KRW-BTC", dec!(100));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );

        let past = StrategyConfig::TimeBasedExit {
            exit_time: Utc::now() - ChronoDuration::seconds(1),
        };
        h.supervisor
            .update_strategy_config(h.user, strategy.id, past)
            .unwrap();

        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Triggered
        );
    }

    #[tokio::test]
    async fn test_short_position_stop_loss_triggers_upward() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-ETH", PositionSide::Short, dec!(100), dec!(1))
            .unwrap();
        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(110),
                },
            )
            .await
            .unwrap();

        h.prices.set_price("KRW-ETH", dec!(109));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );

        h.prices.set_price("KRW-ETH", dec!(110));
        h.supervisor.evaluate_all().await;
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Triggered
        );

        // Closing a short buys back.
        let orders = h.orders.get_by_position(position.id).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, crate::model::OrderSide::Bid);
    }

    #[tokio::test]
    async fn test_create_strategy_validation_and_authorization() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();

        // Out-of-range trail percent.
        h.prices.set_price("KRW-BTC", dec!(100));
        assert!(matches!(
            h.supervisor
                .create_strategy(h.user, position.id, StrategyConfig::trailing_stop(dec!(0)))
                .await,
            Err(TradingError::Validation(_))
        ));
        assert!(matches!(
            h.supervisor
                .create_strategy(
                    h.user,
                    position.id,
                    StrategyConfig::trailing_stop(dec!(101))
                )
                .await,
            Err(TradingError::Validation(_))
        ));

        // Someone else's position.
        assert!(matches!(
            h.supervisor
                .create_strategy(
                    Uuid::new_v4(),
                    position.id,
                    StrategyConfig::StopLoss {
                        stop_price: dec!(90)
                    }
                )
                .await,
            Err(TradingError::Unauthorized(_))
        ));

        // Closed position.
        h.positions.reduce(position.id, dec!(1), dec!(100)).await.unwrap();
        assert!(matches!(
            h.supervisor
                .create_strategy(
                    h.user,
                    position.id,
                    StrategyConfig::StopLoss {
                        stop_price: dec!(90)
                    }
                )
                .await,
            Err(TradingError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_active_strategy_conflicts() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();

        h.supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(90),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            h.supervisor
                .create_strategy(
                    h.user,
                    position.id,
                    StrategyConfig::StopLoss {
                        stop_price: dec!(85)
                    }
                )
                .await,
            Err(TradingError::Conflict(_))
        ));

        // A different type coexists.
        h.supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::TakeProfit {
                    target_price: dec!(120),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_and_update_require_active() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();
        let strategy = h
            .supervisor
            .create_strategy(
                h.user,
                position.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(90),
                },
            )
            .await
            .unwrap();

        // Config updates must keep the type.
        assert!(matches!(
            h.supervisor.update_strategy_config(
                h.user,
                strategy.id,
                StrategyConfig::TakeProfit {
                    target_price: dec!(120)
                }
            ),
            Err(TradingError::Validation(_))
        ));

        let updated = h
            .supervisor
            .update_strategy_config(
                h.user,
                strategy.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(85),
                },
            )
            .unwrap();
        let StrategyConfig::StopLoss { stop_price } = updated.config else {
            panic!("expected stop loss");
        };
        assert_eq!(stop_price, dec!(85));

        let cancelled = h.supervisor.cancel_strategy(h.user, strategy.id).unwrap();
        assert_eq!(cancelled.status, StrategyStatus::Cancelled);

        assert!(matches!(
            h.supervisor.cancel_strategy(h.user, strategy.id),
            Err(TradingError::Conflict(_))
        ));
        assert!(matches!(
            h.supervisor.update_strategy_config(
                h.user,
                strategy.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(80)
                }
            ),
            Err(TradingError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_type_is_skipped_not_cancelled() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();

        // A supervisor whose registry lacks the stop-loss executor.
        let registry = ExecutorRegistry::new();
        let bare = Arc::new(StrategySupervisor::new(
            h.strategies.clone(),
            h.positions.clone(),
            h.prices.clone(),
            registry,
            SupervisorConfig::default(),
        ));

        let strategy = Strategy::new(
            position.id,
            StrategyConfig::StopLoss {
                stop_price: dec!(90),
            },
        );
        h.strategies.create(&strategy).unwrap();

        h.prices.set_price("KRW-BTC", dec!(80));
        bare.evaluate_all().await;

        // User intent preserved for when an executor is registered again.
        assert_eq!(
            h.strategies.get(strategy.id).unwrap().status,
            StrategyStatus::Active
        );
    }

    #[tokio::test]
    async fn test_unsupported_strategy_rejected_at_creation() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-BTC", PositionSide::Long, dec!(100), dec!(1))
            .unwrap();

        let bare = Arc::new(StrategySupervisor::new(
            h.strategies.clone(),
            h.positions.clone(),
            h.prices.clone(),
            ExecutorRegistry::new(),
            SupervisorConfig::default(),
        ));

        assert!(matches!(
            bare.create_strategy(
                h.user,
                position.id,
                StrategyConfig::StopLoss {
                    stop_price: dec!(90)
                }
            )
            .await,
            Err(TradingError::UnsupportedStrategy(_))
        ));
    }

    #[tokio::test]
    async fn test_trailing_stop_creation_requires_price() {
        let h = harness();
        let position = h
            .positions
            .create(h.user, "KRW-XRP", PositionSide::Long, dec!(1), dec!(100))
            .unwrap();

        assert!(matches!(
            h.supervisor
                .create_strategy(
                    h.user,
                    position.id,
                    StrategyConfig::trailing_stop(dec!(5))
                )
                .await,
            Err(TradingError::PriceUnavailable { .. })
        ));
    }
}
