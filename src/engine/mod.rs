//! Trading engine: order submission, split execution, and exchange
//! reconciliation.
//!
//! The engine translates placement requests into exchange submissions and
//! keeps local order state canonical by polling the exchange every few
//! seconds for each monitored order. Observed executed-volume deltas are
//! appended as execution records and routed into the owning position, which
//! is how strategy-driven closing orders actually close positions.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, TradingError};
use crate::exchange::{ExchangeApi, ExchangeConnector, ExchangeOrder, OrderRequest, OrderState};
use crate::model::{Order, OrderExecution, OrderSide, OrderStatus, OrderType};
use crate::store::{CredentialStore, OrderStore, PositionStore};
use crate::utils::decimal::{fixed_8, round_to_precision, EPSILON};

/// A request to place an order, optionally split into several child orders.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price; required for limit orders.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    /// Position the fills should flow into, if any.
    pub position_id: Option<Uuid>,
    /// Number of equal child orders to split into; values below 1 are
    /// treated as 1.
    pub split_count: u32,
}

/// Order execution and state management against the exchange.
pub struct TradingEngine {
    orders: Arc<OrderStore>,
    positions: Arc<PositionStore>,
    credentials: Arc<CredentialStore>,
    connector: Arc<dyn ExchangeConnector>,
    /// Per-user authenticated clients, created lazily and evicted on
    /// credential rotation.
    clients: DashMap<Uuid, Arc<dyn ExchangeApi>>,
    /// Order ids currently being polled for updates.
    monitored: RwLock<HashSet<Uuid>>,
    /// Serializes state application per order id.
    order_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    config: EngineConfig,
}

impl TradingEngine {
    pub fn new(
        orders: Arc<OrderStore>,
        positions: Arc<PositionStore>,
        credentials: Arc<CredentialStore>,
        connector: Arc<dyn ExchangeConnector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            orders,
            positions,
            credentials,
            connector,
            clients: DashMap::new(),
            monitored: RwLock::new(HashSet::new()),
            order_locks: DashMap::new(),
            config,
        }
    }

    /// Run the reconciliation loop until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        info!("Trading engine started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.reconcile_all().await,
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Trading engine stopped");
    }

    /// Create and asynchronously submit orders for `request`.
    ///
    /// The request quantity is partitioned into `split_count` equal children
    /// (the last child absorbs the rounding remainder); every child is
    /// persisted as Pending and submitted on its own task. Returns the
    /// pending orders immediately; submission outcomes are discovered by
    /// reading the orders back.
    pub async fn place_order(
        self: &Arc<Self>,
        user_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<Vec<Order>> {
        if request.quantity <= Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "order quantity must be positive, got {}",
                request.quantity
            )));
        }
        match (request.order_type, request.price) {
            (OrderType::Limit, None) => {
                return Err(TradingError::Validation(
                    "limit orders require a price".into(),
                ));
            }
            (_, Some(price)) if price <= Decimal::ZERO => {
                return Err(TradingError::Validation(format!(
                    "order price must be positive, got {price}"
                )));
            }
            _ => {}
        }

        let split_count = request.split_count.max(1);
        let per_child = round_to_precision(
            request.quantity / Decimal::from(split_count),
            8,
        );

        let mut orders = Vec::with_capacity(split_count as usize);
        for i in 0..split_count {
            let quantity = if i == split_count - 1 {
                request.quantity - per_child * Decimal::from(split_count - 1)
            } else {
                per_child
            };

            let mut order = Order::new(
                user_id,
                &request.market,
                request.side,
                request.order_type,
                quantity,
                request.price,
            );
            order.position_id = request.position_id;
            self.orders.create(&order)?;
            orders.push(order);
        }

        info!(
            user_id = %user_id,
            market = %request.market,
            side = %request.side.as_str(),
            quantity = %request.quantity,
            split_count,
            "Placing order"
        );

        for order in &orders {
            let engine = Arc::clone(self);
            let order = order.clone();
            tokio::spawn(async move { engine.submit_order(order).await });
        }

        Ok(orders)
    }

    /// Submit one child order to the exchange.
    async fn submit_order(self: Arc<Self>, mut order: Order) {
        let client = match self.client_for(order.user_id).await {
            Ok(client) => client,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "No exchange client; order failed");
                order.mark_failed();
                self.persist(&order);
                return;
            }
        };

        let request = OrderRequest {
            market: order.market.clone(),
            side: order.side,
            ord_type: order.order_type,
            volume: Some(fixed_8(order.quantity)),
            price: order.price.map(fixed_8),
        };

        match client.place_order(&request).await {
            Ok(response) => {
                order.mark_submitted(response.uuid.clone());
                self.monitored.write().await.insert(order.id);
                self.persist(&order);
                info!(
                    order_id = %order.id,
                    exchange_order_id = %response.uuid,
                    "Order submitted"
                );
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Exchange rejected order");
                order.mark_failed();
                self.persist(&order);
            }
        }
    }

    /// One reconciliation pass over the monitoring set. Per-order work is
    /// fanned out concurrently but capped, so a large monitoring set cannot
    /// burst an equal number of simultaneous exchange calls.
    pub async fn reconcile_all(self: &Arc<Self>) {
        let order_ids: Vec<Uuid> = self.monitored.read().await.iter().copied().collect();
        if order_ids.is_empty() {
            return;
        }
        debug!(count = order_ids.len(), "Reconciling monitored orders");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_polls));
        let mut handles = Vec::with_capacity(order_ids.len());

        for order_id in order_ids {
            let engine = Arc::clone(self);
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                if let Err(e) = engine.reconcile_order(order_id).await {
                    warn!(
                        order_id = %order_id,
                        error = %e,
                        "Reconciliation failed; will retry next tick"
                    );
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Fetch the exchange's view of one order and fold it into local state.
    async fn reconcile_order(self: &Arc<Self>, order_id: Uuid) -> Result<()> {
        let order = self.orders.get(order_id)?;
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            // Submission has not recorded an exchange id yet.
            return Ok(());
        };

        let client = self.client_for(order.user_id).await?;
        let response = client
            .get_order(&exchange_order_id)
            .await
            .map_err(|e| TradingError::ExchangeReconciliation(e.to_string()))?;

        self.apply_update(order_id, &response).await
    }

    /// Apply an exchange order snapshot: status transition, executed-volume
    /// delta, position flow. Serialized per order id, and idempotent:
    /// re-applying the same snapshot yields a zero delta and no state
    /// change.
    async fn apply_update(self: &Arc<Self>, order_id: Uuid, response: &ExchangeOrder) -> Result<()> {
        let lock = self
            .order_locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut order = self.orders.get(order_id)?;
        let previous_status = order.status;

        match response.state {
            OrderState::Wait | OrderState::Watch => {
                // Keep Partial once fills have been observed.
                if matches!(order.status, OrderStatus::Pending | OrderStatus::Submitted) {
                    order.status = OrderStatus::Submitted;
                }
            }
            OrderState::Done => {
                if !order.is_terminal() {
                    order.mark_filled();
                }
            }
            OrderState::Cancel => {
                if !order.is_terminal() {
                    order.mark_cancelled();
                }
            }
        }

        let delta = response.executed_volume - order.executed_quantity;
        if delta > EPSILON {
            let price = response
                .price
                .or(order.price)
                .unwrap_or(Decimal::ZERO);

            let execution = OrderExecution::new(order.id, price, delta, Decimal::ZERO);
            self.orders.append_execution(&execution)?;
            order.record_fill(delta);

            debug!(
                order_id = %order.id,
                delta = %delta,
                price = %price,
                executed = %order.executed_quantity,
                "Recorded execution"
            );

            if let Some(position_id) = order.position_id {
                let applied = match order.side {
                    OrderSide::Bid => self.positions.increase(position_id, delta, price).await,
                    OrderSide::Ask => self.positions.reduce(position_id, delta, price).await,
                };
                if let Err(e) = applied {
                    error!(
                        order_id = %order.id,
                        position_id = %position_id,
                        error = %e,
                        "Failed to apply fill to position"
                    );
                }
            }
        }

        self.orders.update(&order)?;

        if order.is_terminal() {
            self.monitored.write().await.remove(&order_id);
        }
        if previous_status != order.status {
            info!(
                order_id = %order.id,
                from = previous_status.as_str(),
                to = order.status.as_str(),
                "Order status changed"
            );
        }
        Ok(())
    }

    /// Cancel an order on the exchange.
    ///
    /// The cancel response is applied through the regular update path, so a
    /// final partial fill reported together with the cancel is recorded
    /// before the order settles as Cancelled.
    pub async fn cancel_order(self: &Arc<Self>, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        let order = self.orders.get(order_id)?;
        if order.user_id != user_id {
            return Err(TradingError::Unauthorized(
                "order does not belong to user".into(),
            ));
        }
        if !order.is_pending() {
            return Err(TradingError::Conflict(format!(
                "order cannot be cancelled (status: {})",
                order.status.as_str()
            )));
        }
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            return Err(TradingError::Conflict(
                "order not yet submitted to exchange".into(),
            ));
        };

        let client = self.client_for(user_id).await?;
        let response = client
            .cancel_order(&exchange_order_id)
            .await
            .map_err(|e| TradingError::ExchangeSubmission(e.to_string()))?;

        self.apply_update(order_id, &response).await?;

        let mut order = self.orders.get(order_id)?;
        if !order.is_terminal() {
            order.mark_cancelled();
            self.orders.update(&order)?;
        }
        self.monitored.write().await.remove(&order_id);

        info!(order_id = %order_id, "Order cancelled");
        Ok(order)
    }

    /// Fetch an order, verifying ownership.
    pub fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        let order = self.orders.get(order_id)?;
        if order.user_id != user_id {
            return Err(TradingError::Unauthorized(
                "order does not belong to user".into(),
            ));
        }
        Ok(order)
    }

    pub fn get_user_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.orders.get_by_user(user_id)
    }

    /// Evict a user's cached exchange client; the next call rebuilds it from
    /// the currently-active credentials.
    pub fn invalidate_client(&self, user_id: Uuid) {
        self.clients.remove(&user_id);
        debug!(user_id = %user_id, "Exchange client evicted");
    }

    async fn client_for(&self, user_id: Uuid) -> Result<Arc<dyn ExchangeApi>> {
        if let Some(client) = self.clients.get(&user_id) {
            return Ok(client.clone());
        }

        let credential = self.credentials.get_active(user_id)?;
        let client = self
            .connector
            .connect(&credential)
            .map_err(|e| TradingError::ExchangeSubmission(format!(
                "failed to create exchange client: {e}"
            )))?;
        self.clients.insert(user_id, client.clone());
        Ok(client)
    }

    fn persist(&self, order: &Order) {
        if let Err(e) = self.orders.update(order) {
            error!(order_id = %order.id, error = %e, "Failed to persist order");
        }
    }

    #[cfg(test)]
    async fn is_monitored(&self, order_id: Uuid) -> bool {
        self.monitored.read().await.contains(&order_id)
    }
}
