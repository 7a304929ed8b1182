//! Exchange connectivity.
//!
//! - `api`: the venue-facing trait the trading engine drives, plus the wire
//!   types shared by every implementation
//! - `upbit`: authenticated REST client for the exchange API
//! - `quotation`: public market-data client (ticker prices)
//! - `rate_limit`: token-bucket pacing for both API families
//! - `mock`: scripted in-memory exchange for tests

pub mod api;
pub mod mock;
pub mod quotation;
pub mod rate_limit;
pub mod upbit;

pub use api::{ExchangeApi, ExchangeConnector, ExchangeOrder, OrderRequest, OrderState};
pub use mock::{MockConnector, MockExchange, MockPriceSource};
pub use quotation::{MarketPriceSource, Ticker, UpbitQuotationClient};
pub use rate_limit::RateLimiter;
pub use upbit::{UpbitClient, UpbitConnector};
