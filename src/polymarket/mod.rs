//! Polymarket Client
//!
//! Prediction-market side of the overlay:
//! - Period open/close price for an explicit interval window
//! - Gamma market discovery and active-market disambiguation
//! - CLOB last-trade price lookups
//! - One-shot market order placement (EIP-712 + L2 HMAC auth)

pub mod discovery;
pub mod order;
pub mod profiles;
pub mod rest;
pub mod signing;
pub mod types;

pub use discovery::{select_active_market, token_for_direction, up_price};
pub use order::{OrderGateway, OrderOutcome, OrderPlacer, OrderRequest};
pub use profiles::{profile, IntervalProfile, INTERVAL_PROFILES};
pub use rest::PolymarketClient;
pub use types::{CandidateMarket, PeriodPrices};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::period::IntervalWindow;

/// Read-only prediction-market data used by the aggregator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionMarket: Send + Sync {
    /// Open/close price of `asset` over `window`; close is `None` while the window is open
    async fn period_prices(&self, asset: &str, window: &IntervalWindow) -> Result<PeriodPrices>;

    /// Candidate markets listed under a discovery category
    async fn discover_markets(&self, category: &str) -> Result<Vec<CandidateMarket>>;

    /// Last traded price (0..1) of one outcome token
    async fn last_trade_price(&self, token_id: &str) -> Result<Decimal>;
}
