//! Venue-facing trait and wire types for the exchange API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{OrderSide, OrderType};
use crate::store::ApiCredential;

/// Order submission payload. Quantities and prices travel as fixed-point
/// decimal strings with 8 fractional digits.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub market: String,
    pub side: OrderSide,
    pub ord_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl OrderRequest {
    /// The canonical query string for this request, in key order, used for
    /// the authentication query hash.
    pub fn query_string(&self) -> String {
        let mut parts = vec![format!("market={}", self.market)];
        parts.push(format!("ord_type={}", self.ord_type.as_str()));
        if let Some(price) = &self.price {
            parts.push(format!("price={price}"));
        }
        parts.push(format!("side={}", self.side.as_str()));
        if let Some(volume) = &self.volume {
            parts.push(format!("volume={volume}"));
        }
        parts.join("&")
    }
}

/// Exchange-reported order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// Resting on the book.
    Wait,
    /// Reserved (watched) order, e.g. a best-price order waiting to quote.
    Watch,
    /// Fully executed.
    Done,
    /// Cancelled; may still carry a final executed volume.
    Cancel,
}

/// An order as reported by the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeOrder {
    pub uuid: String,
    pub state: OrderState,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_volume: Decimal,
    /// The order's price field. For limit orders this is the submitted
    /// price, not a per-fill average.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-user authenticated exchange operations.
///
/// Implementations must respect the process-wide exchange rate limit; the
/// engine calls these concurrently from its submission and reconciliation
/// paths.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> anyhow::Result<ExchangeOrder>;

    async fn get_order(&self, uuid: &str) -> anyhow::Result<ExchangeOrder>;

    async fn cancel_order(&self, uuid: &str) -> anyhow::Result<ExchangeOrder>;
}

/// Builds an authenticated [`ExchangeApi`] client from a credential pair.
/// The trading engine uses this to lazily populate its per-user client
/// cache.
pub trait ExchangeConnector: Send + Sync {
    fn connect(&self, credential: &ApiCredential) -> anyhow::Result<Arc<dyn ExchangeApi>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_serializes_wire_fields() {
        let request = OrderRequest {
            market: "KRW-BTC".to_string(),
            side: OrderSide::Bid,
            ord_type: OrderType::Limit,
            volume: Some("1.00000000".to_string()),
            price: Some("100.00000000".to_string()),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""side":"bid""#));
        assert!(json.contains(r#""ord_type":"limit""#));
        assert!(json.contains(r#""volume":"1.00000000""#));
    }

    #[test]
    fn test_market_order_omits_price() {
        let request = OrderRequest {
            market: "KRW-BTC".to_string(),
            side: OrderSide::Ask,
            ord_type: OrderType::Market,
            volume: Some("1.00000000".to_string()),
            price: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("price"));
        assert_eq!(
            request.query_string(),
            "market=KRW-BTC&ord_type=market&side=ask&volume=1.00000000"
        );
    }

    #[test]
    fn test_response_parses_decimal_strings() {
        let json = r#"{
            "uuid": "ex-1",
            "state": "wait",
            "executed_volume": "0.40000000",
            "price": "100.0",
            "created_at": "2024-01-15T09:00:00+09:00"
        }"#;

        let order: ExchangeOrder = serde_json::from_str(json).unwrap();
        assert_eq!(order.state, OrderState::Wait);
        assert_eq!(order.executed_volume, dec!(0.4));
        assert_eq!(order.price, Some(dec!(100)));
        assert!(order.created_at.is_some());
    }

    #[test]
    fn test_response_tolerates_missing_price() {
        let json = r#"{"uuid":"ex-2","state":"done","executed_volume":"1"}"#;
        let order: ExchangeOrder = serde_json::from_str(json).unwrap();
        assert_eq!(order.state, OrderState::Done);
        assert!(order.price.is_none());
    }
}
