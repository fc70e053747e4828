//! Polymarket REST Client
//!
//! Handles HTTP communication with the crypto-price, Gamma and CLOB APIs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use ethers::signers::{LocalWallet, Signer};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::profiles::profile;
use super::signing::{create_l1_signature, create_l2_signature, SignedOrder};
use super::types::{
    ApiCredentials, CandidateMarket, CryptoPriceResponse, LastTradePriceResponse, MarketResponse,
    PeriodPrices, PriceResponse,
};
use super::PredictionMarket;
use crate::config::PolymarketConfig;
use crate::period::IntervalWindow;

/// REST client for the Polymarket public and CLOB endpoints
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    client: Client,
    crypto_price_url: String,
    gamma_url: String,
    clob_url: String,
}

impl PolymarketClient {
    pub fn new(config: &PolymarketConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            crypto_price_url: config.crypto_price_url.clone(),
            gamma_url: config.gamma_url.trim_end_matches('/').to_string(),
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", what))?;

        if !response.status().is_success() {
            bail!("Failed to get {}: {}", what, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    /// Best price to BUY `token_id` right now (the best ask)
    /// Endpoint: GET /price?token_id={id}&side=BUY
    pub async fn best_ask(&self, token_id: &str) -> Result<Decimal> {
        let url = format!("{}/price?token_id={}&side=BUY", self.clob_url, token_id);
        let resp: PriceResponse = self.get_json(&url, "price").await?;
        Decimal::from_str(&resp.price).context("Failed to parse price value")
    }

    fn build_l1_headers(
        wallet: &LocalWallet,
        signature: &str,
        timestamp: i64,
        nonce: u64,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "POLY_ADDRESS",
            HeaderValue::from_str(&format!("{:#x}", wallet.address()))
                .context("Invalid POLY_ADDRESS for L1 auth")?,
        );
        headers.insert(
            "POLY_SIGNATURE",
            HeaderValue::from_str(signature).context("Invalid POLY_SIGNATURE for L1 auth")?,
        );
        headers.insert(
            "POLY_TIMESTAMP",
            HeaderValue::from_str(&timestamp.to_string())
                .context("Invalid POLY_TIMESTAMP for L1 auth")?,
        );
        headers.insert(
            "POLY_NONCE",
            HeaderValue::from_str(&nonce.to_string()).context("Invalid POLY_NONCE for L1 auth")?,
        );
        Ok(headers)
    }

    fn build_l2_headers(
        wallet: &LocalWallet,
        creds: &ApiCredentials,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp();
        let signature =
            create_l2_signature(&creds.secret, timestamp, method, request_path, Some(body))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "POLY_ADDRESS",
            HeaderValue::from_str(&format!("{:#x}", wallet.address()))
                .context("Invalid POLY_ADDRESS header value")?,
        );
        headers.insert(
            "POLY_SIGNATURE",
            HeaderValue::from_str(&signature).context("Invalid POLY_SIGNATURE header value")?,
        );
        headers.insert(
            "POLY_TIMESTAMP",
            HeaderValue::from_str(&timestamp.to_string())
                .context("Invalid POLY_TIMESTAMP header value")?,
        );
        headers.insert(
            "POLY_API_KEY",
            HeaderValue::from_str(&creds.api_key).context("Invalid POLY_API_KEY header value")?,
        );
        headers.insert(
            "POLY_PASSPHRASE",
            HeaderValue::from_str(&creds.passphrase)
                .context("Invalid POLY_PASSPHRASE header value")?,
        );
        Ok(headers)
    }

    /// Create or derive L2 API credentials using L1 signed auth endpoints.
    /// Flow:
    /// 1) POST /auth/api-key
    /// 2) fallback GET /auth/derive-api-key
    pub async fn create_or_derive_api_credentials(
        &self,
        wallet: &LocalWallet,
        chain_id: u64,
    ) -> Result<ApiCredentials> {
        let timestamp = Utc::now().timestamp();
        let nonce = 0u64;
        let signature = create_l1_signature(wallet, chain_id, timestamp, nonce).await?;
        let headers = Self::build_l1_headers(wallet, &signature, timestamp, nonce)?;

        let create_url = format!("{}/auth/api-key", self.clob_url);
        let create_resp = self
            .client
            .post(&create_url)
            .headers(headers.clone())
            .body("{}")
            .send()
            .await
            .context("Failed POST /auth/api-key")?;

        if create_resp.status().is_success() {
            let raw: serde_json::Value = create_resp
                .json()
                .await
                .context("Failed parsing /auth/api-key response")?;
            return extract_l2_credentials(&raw);
        }

        let derive_url = format!("{}/auth/derive-api-key", self.clob_url);
        let derive_resp = self
            .client
            .get(&derive_url)
            .headers(headers)
            .send()
            .await
            .context("Failed GET /auth/derive-api-key")?;

        if !derive_resp.status().is_success() {
            let create_status = create_resp.status();
            let create_body = create_resp.text().await.unwrap_or_default();
            let derive_status = derive_resp.status();
            let derive_body = derive_resp.text().await.unwrap_or_default();
            bail!(
                "L1 auth endpoints failed. create: {} [{}], derive: {} [{}]",
                create_status,
                create_body,
                derive_status,
                derive_body
            );
        }

        let raw: serde_json::Value = derive_resp
            .json()
            .await
            .context("Failed parsing /auth/derive-api-key response")?;
        extract_l2_credentials(&raw)
    }

    /// Post a signed order; returns the exchange order id
    pub async fn post_order(
        &self,
        wallet: &LocalWallet,
        creds: &ApiCredentials,
        order: &SignedOrder,
    ) -> Result<String> {
        let request_path = "/order";
        let url = format!("{}{}", self.clob_url, request_path);

        let body = serde_json::to_string(&order.to_payload(&creds.api_key))
            .context("Failed to serialize create order payload")?;
        let headers = Self::build_l2_headers(wallet, creds, "POST", request_path, &body)?;

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("Failed to create order")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Failed to create order: {} - {}", status, text);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse create order response")?;
        extract_order_id(&raw)
    }
}

#[async_trait]
impl PredictionMarket for PolymarketClient {
    async fn period_prices(&self, asset: &str, window: &IntervalWindow) -> Result<PeriodPrices> {
        let profile = profile(window.interval)
            .with_context(|| format!("No prediction profile for interval {}", window.interval))?;
        let url = format!(
            "{}?symbol={}&eventStartTime={}&variant={}&endDate={}",
            self.crypto_price_url,
            asset,
            window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            profile.variant,
            window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        debug!(asset, interval = %window.interval, "Fetching period prices");

        let resp: CryptoPriceResponse = self.get_json(&url, "crypto price").await?;
        Ok(resp.into())
    }

    async fn discover_markets(&self, category: &str) -> Result<Vec<CandidateMarket>> {
        let url = format!(
            "{}/markets?tag_slug={}&active=true&closed=false&limit=100",
            self.gamma_url, category
        );
        let markets: Vec<MarketResponse> = self.get_json(&url, "markets").await?;
        debug!(category, count = markets.len(), "Fetched candidate markets");
        Ok(markets.into_iter().map(CandidateMarket::from).collect())
    }

    /// Endpoint: GET /last_trade_price?token_id={id}
    async fn last_trade_price(&self, token_id: &str) -> Result<Decimal> {
        let url = format!("{}/last_trade_price?token_id={}", self.clob_url, token_id);
        let resp: LastTradePriceResponse = self.get_json(&url, "last trade price").await?;
        Decimal::from_str(&resp.price).context("Failed to parse last trade price value")
    }
}

fn extract_l2_credentials(raw: &serde_json::Value) -> Result<ApiCredentials> {
    fn pick(value: &serde_json::Value, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|key| {
            value
                .get(*key)
                .and_then(|v| v.as_str())
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
        })
    }

    let data = raw.get("data").unwrap_or(raw);
    Ok(ApiCredentials {
        api_key: pick(data, &["apiKey", "api_key", "key"])
            .context("Missing api key in auth response")?,
        secret: pick(data, &["secret", "apiSecret", "api_secret"])
            .context("Missing api secret in auth response")?,
        passphrase: pick(data, &["passphrase", "apiPassphrase", "api_passphrase"])
            .context("Missing passphrase in auth response")?,
    })
}

fn extract_order_id(raw: &serde_json::Value) -> Result<String> {
    if raw.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let msg = raw
            .get("errorMsg")
            .and_then(|v| v.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or("order rejected");
        bail!("{}", msg);
    }

    ["orderID", "order_id", "orderId", "id"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(|v| v.as_str()))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .with_context(|| format!("Missing order id in create order response: {}", raw))
}
