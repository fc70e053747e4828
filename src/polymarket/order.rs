//! Order path - one-shot market order placement
//!
//! Resolves the token for (symbol, interval, direction), derives session
//! credentials from the signing key, prices the order off the best ask and
//! posts it fill-or-kill. Every failure becomes a failed outcome; nothing is
//! retried.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::discovery::{select_active_market, token_for_direction};
use super::profiles::profile;
use super::rest::PolymarketClient;
use super::signing::{parse_wallet, sign_market_buy, MarketBuy};
use super::PredictionMarket;
use crate::config::PolymarketConfig;
use crate::types::{find_symbol, Direction, Interval};

#[derive(Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub interval: Interval,
    pub direction: Direction,
    pub amount_usdc: Decimal,
    #[serde(skip_serializing)]
    pub private_key: String,
}

impl std::fmt::Debug for OrderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRequest")
            .field("symbol", &self.symbol)
            .field("interval", &self.interval)
            .field("direction", &self.direction)
            .field("amount_usdc", &self.amount_usdc)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub success: bool,
    pub order_id: Option<String>,
    pub message: String,
}

impl OrderOutcome {
    pub fn filled(order_id: String, message: String) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            message,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            message: message.into(),
        }
    }
}

/// Opaque order submission seam used by the engine
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place(&self, request: OrderRequest) -> OrderOutcome;
}

/// Polymarket CLOB order placement
pub struct OrderPlacer {
    client: PolymarketClient,
    chain_id: u64,
    signature_type: u8,
}

impl OrderPlacer {
    pub fn new(client: PolymarketClient, config: &PolymarketConfig) -> Self {
        Self {
            client,
            chain_id: config.chain_id,
            signature_type: config.signature_type,
        }
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderOutcome> {
        let (keyword, category) = validate(request)?;

        let candidates = self.client.discover_markets(category).await?;
        let market = select_active_market(&candidates, keyword, Utc::now()).with_context(|| {
            format!("No market found for {} {}", request.symbol, request.interval)
        })?;
        let token_id = token_for_direction(market, request.direction)
            .with_context(|| format!("No {} token in market {}", request.direction, market.slug))?
            .to_string();

        let wallet = parse_wallet(&request.private_key, self.chain_id)?;
        let creds = self
            .client
            .create_or_derive_api_credentials(&wallet, self.chain_id)
            .await?;

        let price = self.client.best_ask(&token_id).await?;
        let order = MarketBuy::new(token_id, price, request.amount_usdc, self.signature_type);
        let signed = sign_market_buy(&order, &wallet, self.chain_id).await?;
        let order_id = self.client.post_order(&wallet, &creds, &signed).await?;

        Ok(OrderOutcome::filled(
            order_id,
            format!(
                "Order placed: {} {} {}, amount ${}",
                request.direction, request.symbol, request.interval, request.amount_usdc
            ),
        ))
    }
}

/// Input checks that need no network; returns (market keyword, discovery category)
fn validate(request: &OrderRequest) -> Result<(&'static str, &'static str)> {
    if request.private_key.trim().is_empty() {
        bail!("Signing key is required");
    }
    if request.amount_usdc <= Decimal::ZERO {
        bail!("Amount must be positive");
    }
    let symbol = find_symbol(&request.symbol)
        .with_context(|| format!("Unknown symbol {}", request.symbol))?;
    let keyword = symbol
        .market_keyword
        .with_context(|| format!("{} has no prediction markets", symbol.display_name))?;
    let category = profile(request.interval)
        .with_context(|| format!("No prediction market for interval {}", request.interval))?
        .category;
    Ok((keyword, category))
}

#[async_trait]
impl OrderGateway for OrderPlacer {
    async fn place(&self, request: OrderRequest) -> OrderOutcome {
        match self.submit(&request).await {
            Ok(outcome) => {
                info!(
                    symbol = %request.symbol,
                    interval = %request.interval,
                    direction = %request.direction,
                    order_id = ?outcome.order_id,
                    "✅ Order placed"
                );
                outcome
            }
            Err(e) => {
                warn!(
                    symbol = %request.symbol,
                    interval = %request.interval,
                    error = %e,
                    "Order placement failed"
                );
                OrderOutcome::failed(format!("Order failed: {:#}", e))
            }
        }
    }
}
