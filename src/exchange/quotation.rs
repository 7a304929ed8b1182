//! Public quotation client: current ticker prices by market.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::exchange::rate_limit::RateLimiter;

const QUOTATION_BASE_URL: &str = "https://api.upbit.com/v1";

/// Source of current market prices for strategy evaluation.
#[async_trait]
pub trait MarketPriceSource: Send + Sync {
    /// The latest trade price for `market`.
    async fn current_price(&self, market: &str) -> anyhow::Result<Decimal>;
}

/// Ticker snapshot. The supervisor consumes only `trade_price`; the rest of
/// the quotation payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub market: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub trade_price: Decimal,
}

/// Unauthenticated quotation API client. Quotation calls share a single
/// 30 rps process-wide bucket.
pub struct UpbitQuotationClient {
    http: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl UpbitQuotationClient {
    pub fn new(limiter: Arc<RateLimiter>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: QUOTATION_BASE_URL.to_string(),
            limiter,
        })
    }

    /// Fetch tickers for a list of markets.
    pub async fn get_ticker(&self, markets: &[&str]) -> anyhow::Result<Vec<Ticker>> {
        self.limiter.acquire().await;

        let url = format!("{}/ticker?markets={}", self.base_url, markets.join(","));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("quotation API error: status={status}, body={body}");
        }

        response
            .json()
            .await
            .context("Failed to parse ticker response")
    }
}

#[async_trait]
impl MarketPriceSource for UpbitQuotationClient {
    async fn current_price(&self, market: &str) -> anyhow::Result<Decimal> {
        let tickers = self.get_ticker(&[market]).await?;
        match tickers.first() {
            Some(ticker) => Ok(ticker.trade_price),
            None => bail!("no ticker data for market {market}"),
        }
    }
}
