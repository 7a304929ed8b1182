//! Scripted mock exchange and price source for tests.
//!
//! The mock accepts every order immediately (unless failure is armed) and
//! reports whatever state the test scripts for it, which lets tests drive
//! the reconciliation loop one deterministic step at a time.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::exchange::api::{ExchangeApi, ExchangeConnector, ExchangeOrder, OrderRequest, OrderState};
use crate::exchange::quotation::MarketPriceSource;
use crate::store::ApiCredential;

#[derive(Debug, Clone)]
struct ScriptedOrder {
    request: OrderRequest,
    state: OrderState,
    executed_volume: Decimal,
    price: Option<Decimal>,
}

/// In-memory exchange double.
pub struct MockExchange {
    orders: RwLock<HashMap<String, ScriptedOrder>>,
    order_counter: AtomicU64,
    fail_submissions: AtomicBool,
}

impl MockExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: RwLock::new(HashMap::new()),
            order_counter: AtomicU64::new(1),
            fail_submissions: AtomicBool::new(false),
        })
    }

    /// Arm or disarm submission failures.
    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Script the state the exchange reports for `uuid` from now on.
    pub async fn report(
        &self,
        uuid: &str,
        state: OrderState,
        executed_volume: Decimal,
        price: Option<Decimal>,
    ) {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(uuid)
            .unwrap_or_else(|| panic!("unknown mock order {uuid}"));
        order.state = state;
        order.executed_volume = executed_volume;
        if price.is_some() {
            order.price = price;
        }
    }

    /// Number of orders accepted so far.
    pub async fn placed_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// The submission request recorded for `uuid`.
    pub async fn request_for(&self, uuid: &str) -> Option<OrderRequest> {
        self.orders.read().await.get(uuid).map(|o| o.request.clone())
    }

    fn snapshot(uuid: &str, order: &ScriptedOrder) -> ExchangeOrder {
        ExchangeOrder {
            uuid: uuid.to_string(),
            state: order.state,
            executed_volume: order.executed_volume,
            price: order.price,
            created_at: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn place_order(&self, request: &OrderRequest) -> anyhow::Result<ExchangeOrder> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            bail!("exchange API error: status=400, body=insufficient funds");
        }

        let uuid = format!("mock-{}", self.order_counter.fetch_add(1, Ordering::SeqCst));
        let price = request
            .price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok());

        let order = ScriptedOrder {
            request: request.clone(),
            state: OrderState::Wait,
            executed_volume: Decimal::ZERO,
            price,
        };
        let snapshot = Self::snapshot(&uuid, &order);
        self.orders.write().await.insert(uuid, order);
        Ok(snapshot)
    }

    async fn get_order(&self, uuid: &str) -> anyhow::Result<ExchangeOrder> {
        let orders = self.orders.read().await;
        match orders.get(uuid) {
            Some(order) => Ok(Self::snapshot(uuid, order)),
            None => bail!("order {uuid} not found"),
        }
    }

    async fn cancel_order(&self, uuid: &str) -> anyhow::Result<ExchangeOrder> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(uuid) {
            Some(order) => {
                order.state = OrderState::Cancel;
                Ok(Self::snapshot(uuid, order))
            }
            None => bail!("order {uuid} not found"),
        }
    }
}

/// Connector handing every user the same shared mock exchange.
pub struct MockConnector {
    exchange: Arc<MockExchange>,
    connect_count: AtomicUsize,
}

impl MockConnector {
    pub fn new(exchange: Arc<MockExchange>) -> Arc<Self> {
        Arc::new(Self {
            exchange,
            connect_count: AtomicUsize::new(0),
        })
    }

    /// How many clients have been constructed; exercises the engine's
    /// cache-hit and eviction behavior.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

impl ExchangeConnector for MockConnector {
    fn connect(&self, _credential: &ApiCredential) -> anyhow::Result<Arc<dyn ExchangeApi>> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.exchange.clone())
    }
}

/// Scripted price source.
pub struct MockPriceSource {
    prices: std::sync::RwLock<HashMap<String, Decimal>>,
}

impl MockPriceSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prices: std::sync::RwLock::new(HashMap::new()),
        })
    }

    pub fn set_price(&self, market: &str, price: Decimal) {
        self.prices
            .write()
            .expect("price map lock poisoned")
            .insert(market.to_string(), price);
    }

    /// Remove the price so the next fetch fails, simulating an outage.
    pub fn clear_price(&self, market: &str) {
        self.prices
            .write()
            .expect("price map lock poisoned")
            .remove(market);
    }
}

#[async_trait]
impl MarketPriceSource for MockPriceSource {
    async fn current_price(&self, market: &str) -> anyhow::Result<Decimal> {
        let prices = self.prices.read().expect("price map lock poisoned");
        match prices.get(market) {
            Some(price) => Ok(*price),
            None => bail!("no ticker data for market {market}"),
        }
    }
}
