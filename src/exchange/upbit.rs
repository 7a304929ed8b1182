//! Authenticated REST client for the exchange API.
//!
//! Every request carries a JWT signed with the user's secret key (HS256);
//! requests with parameters additionally embed a SHA-512 hash of the query
//! string in the token claims.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};
use uuid::Uuid;

use crate::exchange::api::{ExchangeApi, ExchangeConnector, ExchangeOrder, OrderRequest};
use crate::exchange::rate_limit::RateLimiter;
use crate::store::ApiCredential;

const EXCHANGE_BASE_URL: &str = "https://api.upbit.com/v1";

/// Exchange API client authenticated as a single user.
pub struct UpbitClient {
    http: Client,
    access_key: String,
    secret_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl UpbitClient {
    /// Create a new client from a credential pair. The limiter is shared
    /// process-wide across all users' clients.
    pub fn new(
        credential: &ApiCredential,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            access_key: credential.access_key.clone(),
            secret_key: credential.secret_key.clone(),
            base_url: EXCHANGE_BASE_URL.to_string(),
            limiter,
        })
    }

    /// Build the per-request authentication token: a compact JWT whose
    /// claims carry the access key, a nonce, and (for parameterized
    /// requests) a SHA-512 hash of the query string.
    fn auth_token(&self, query: Option<&str>) -> anyhow::Result<String> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);

        let mut claims = json!({
            "access_key": self.access_key,
            "nonce": Uuid::new_v4().to_string(),
        });
        if let Some(query) = query {
            let mut hasher = Sha512::new();
            hasher.update(query.as_bytes());
            claims["query_hash"] = json!(hex::encode(hasher.finalize()));
            claims["query_hash_alg"] = json!("SHA512");
        }
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);

        let signing_input = format!("{header}.{payload}");
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    async fn decode(response: Response) -> anyhow::Result<ExchangeOrder> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("exchange API error: status={status}, body={body}");
        }
        response
            .json()
            .await
            .context("Failed to decode order response")
    }
}

#[async_trait]
impl ExchangeApi for UpbitClient {
    async fn place_order(&self, request: &OrderRequest) -> anyhow::Result<ExchangeOrder> {
        self.limiter.acquire().await;

        let token = self.auth_token(Some(&request.query_string()))?;
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .context("Failed to submit order")?;

        Self::decode(response).await
    }

    async fn get_order(&self, uuid: &str) -> anyhow::Result<ExchangeOrder> {
        self.limiter.acquire().await;

        let query = format!("uuid={uuid}");
        let token = self.auth_token(Some(&query))?;
        let response = self
            .http
            .get(format!("{}/order?{query}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to fetch order")?;

        Self::decode(response).await
    }

    async fn cancel_order(&self, uuid: &str) -> anyhow::Result<ExchangeOrder> {
        self.limiter.acquire().await;

        let query = format!("uuid={uuid}");
        let token = self.auth_token(Some(&query))?;
        let response = self
            .http
            .delete(format!("{}/order?{query}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to cancel order")?;

        Self::decode(response).await
    }
}

/// Builds [`UpbitClient`]s for the engine's per-user cache, sharing one
/// process-wide rate limiter.
pub struct UpbitConnector {
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl UpbitConnector {
    pub fn new(limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        Self { limiter, timeout }
    }
}

impl ExchangeConnector for UpbitConnector {
    fn connect(&self, credential: &ApiCredential) -> anyhow::Result<Arc<dyn ExchangeApi>> {
        Ok(Arc::new(UpbitClient::new(
            credential,
            self.limiter.clone(),
            self.timeout,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> UpbitClient {
        let credential = ApiCredential {
            user_id: Uuid::new_v4(),
            access_key: "test-access".to_string(),
            secret_key: "test-secret".to_string(),
        };
        UpbitClient::new(
            &credential,
            Arc::new(RateLimiter::new(8)),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    fn decode_claims(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_token_has_three_segments() {
        let client = test_client();
        let token = client.auth_token(None).unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_claims_without_query() {
        let client = test_client();
        let claims = decode_claims(&client.auth_token(None).unwrap());

        assert_eq!(claims["access_key"], "test-access");
        assert!(claims["nonce"].is_string());
        assert!(claims.get("query_hash").is_none());
    }

    #[test]
    fn test_claims_hash_the_query() {
        let client = test_client();
        let claims = decode_claims(&client.auth_token(Some("uuid=abc")).unwrap());

        assert_eq!(claims["query_hash_alg"], "SHA512");
        let mut hasher = Sha512::new();
        hasher.update(b"uuid=abc");
        assert_eq!(claims["query_hash"], hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_nonce_is_unique_per_token() {
        let client = test_client();
        let first = decode_claims(&client.auth_token(None).unwrap());
        let second = decode_claims(&client.auth_token(None).unwrap());
        assert_ne!(first["nonce"], second["nonce"]);
    }
}
