//! Multi-Interval Aggregator - per-cycle fan-out/fan-in over tracked intervals
//!
//! Every interval resolves independently: the aligned window, the period
//! open/close and the active market's traded probability. Sub-queries run
//! concurrently and a cycle settles only when all of them have; one
//! interval failing never takes the others down with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::period::PeriodAligner;
use crate::polymarket::{
    profile, select_active_market, token_for_direction, up_price, IntervalProfile,
    PredictionMarket,
};
use crate::types::{Direction, Interval, SymbolConfig};

/// Latest view of one tracked interval; refreshed as a set every cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedIntervalResult {
    pub interval: Interval,
    pub label: &'static str,
    pub color: &'static str,
    pub open_price: Decimal,
    /// `None` while the window is still open
    pub close_price: Option<Decimal>,
    /// 0..=100
    pub traded_probability: Decimal,
    /// Up token of the active market, used for fast probability polls
    pub primary_token_id: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Fresh probability for one interval from a direct token lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbabilityUpdate {
    pub interval: Interval,
    /// Token the price was read from; only applies while it is still the active one
    pub token_id: String,
    pub traded_probability: Decimal,
}

struct MarketView {
    probability: Decimal,
    token_id: Option<String>,
}

/// Price (0..1) to a rounded percentage
fn to_percent(price: Decimal) -> Decimal {
    (price * Decimal::ONE_HUNDRED)
        .round_dp(1)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

#[derive(Clone)]
pub struct MultiIntervalAggregator {
    market: Arc<dyn PredictionMarket>,
    aligner: PeriodAligner,
    default_probability: Decimal,
}

impl MultiIntervalAggregator {
    pub fn new(
        market: Arc<dyn PredictionMarket>,
        aligner: PeriodAligner,
        default_probability: Decimal,
    ) -> Self {
        Self {
            market,
            aligner,
            default_probability,
        }
    }

    /// One full cycle; results come back in interval order
    pub async fn refresh(
        &self,
        symbol: &SymbolConfig,
        intervals: &[Interval],
        now: DateTime<Utc>,
    ) -> Vec<AggregatedIntervalResult> {
        let Some(keyword) = symbol.market_keyword else {
            debug!(symbol = %symbol.symbol, "No prediction markets for symbol");
            return Vec::new();
        };

        let lookups = intervals
            .iter()
            .map(|&interval| self.resolve_interval(symbol, keyword, interval, now));
        let mut results: Vec<AggregatedIntervalResult> =
            join_all(lookups).await.into_iter().flatten().collect();
        results.sort_by_key(|r| r.interval);
        results.dedup_by_key(|r| r.interval);

        info!(
            symbol = %symbol.symbol,
            requested = intervals.len(),
            resolved = results.len(),
            "📊 Aggregation cycle complete"
        );
        results
    }

    async fn resolve_interval(
        &self,
        symbol: &SymbolConfig,
        keyword: &str,
        interval: Interval,
        now: DateTime<Utc>,
    ) -> Option<AggregatedIntervalResult> {
        let window = match self.aligner.current_window(interval, now) {
            Ok(window) => window,
            Err(e) => {
                warn!(interval = %interval, error = %e, "Skipping interval");
                return None;
            }
        };
        let Some(profile) = profile(interval) else {
            warn!(interval = %interval, "No prediction profile for interval");
            return None;
        };

        let (prices, market) = tokio::join!(
            self.market.period_prices(symbol.base_asset, &window),
            self.resolve_market(keyword, profile, now)
        );

        let prices = match prices {
            Ok(prices) => prices,
            Err(e) => {
                warn!(interval = %interval, error = %e, "Period price fetch failed");
                return None;
            }
        };
        let Some(open_price) = prices.open else {
            debug!(interval = %interval, "Period has no open price yet");
            return None;
        };

        Some(AggregatedIntervalResult {
            interval,
            label: profile.label,
            color: profile.color,
            open_price,
            close_price: prices.close,
            traded_probability: market.probability,
            primary_token_id: market.token_id,
            window_start: window.start,
            window_end: window.end,
        })
    }

    /// Active market probability; falls back to the default when discovery fails
    async fn resolve_market(
        &self,
        keyword: &str,
        profile: &IntervalProfile,
        now: DateTime<Utc>,
    ) -> MarketView {
        let fallback = MarketView {
            probability: self.default_probability,
            token_id: None,
        };

        let candidates = match self.market.discover_markets(profile.category).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(category = profile.category, error = %e, "Market discovery failed");
                return fallback;
            }
        };
        let Some(market) = select_active_market(&candidates, keyword, now) else {
            return fallback;
        };

        MarketView {
            probability: up_price(market)
                .map(to_percent)
                .unwrap_or(self.default_probability),
            token_id: token_for_direction(market, Direction::Up).map(str::to_string),
        }
    }

    /// Lighter sub-refresh: direct token lookups for intervals with a known token
    pub async fn fetch_probabilities(
        &self,
        results: &[AggregatedIntervalResult],
    ) -> Vec<ProbabilityUpdate> {
        let lookups = results.iter().filter_map(|r| {
            let token = r.primary_token_id.clone()?;
            let interval = r.interval;
            Some(async move {
                let lookup = self.market.last_trade_price(&token).await;
                match lookup {
                    Ok(price) => Some(ProbabilityUpdate {
                        interval,
                        token_id: token,
                        traded_probability: to_percent(price),
                    }),
                    Err(e) => {
                        debug!(interval = %interval, error = %e, "Token price lookup failed");
                        None
                    }
                }
            })
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }
}

/// Apply probability updates in place; windows and open prices are untouched
pub fn apply_probability_updates(
    results: &mut [AggregatedIntervalResult],
    updates: &[ProbabilityUpdate],
) -> usize {
    let mut applied = 0;
    for update in updates {
        let target = results.iter_mut().find(|r| {
            r.interval == update.interval
                && r.primary_token_id.as_deref() == Some(update.token_id.as_str())
        });
        if let Some(r) = target {
            if r.traded_probability != update.traded_probability {
                r.traded_probability = update.traded_probability;
                applied += 1;
            }
        }
    }
    applied
}
