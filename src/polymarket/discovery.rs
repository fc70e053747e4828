//! Market Discovery - pick the live up/down market for an asset
//!
//! A category listing holds markets for every asset and for several future
//! windows. The active one is the earliest-expiring binary market for the
//! asset keyword whose end time is still ahead of `now`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::types::CandidateMarket;
use crate::types::Direction;

fn matches_keyword(market: &CandidateMarket, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    market.slug.to_lowercase().contains(&keyword)
        || market.question.to_lowercase().contains(&keyword)
}

/// Earliest-expiring still-open binary market matching `keyword`
pub fn select_active_market<'a>(
    candidates: &'a [CandidateMarket],
    keyword: &str,
    now: DateTime<Utc>,
) -> Option<&'a CandidateMarket> {
    let selected = candidates
        .iter()
        .filter(|m| !m.closed && m.is_binary() && matches_keyword(m, keyword))
        .filter_map(|m| m.end_time.filter(|end| *end > now).map(|end| (end, m)))
        .min_by_key(|(end, _)| *end)
        .map(|(_, m)| m);

    match selected {
        Some(m) => debug!(
            keyword,
            slug = %m.slug,
            end = ?m.end_time,
            candidates = candidates.len(),
            "Active market selected"
        ),
        None => debug!(keyword, candidates = candidates.len(), "No active market"),
    }
    selected
}

fn outcome_index(market: &CandidateMarket, direction: Direction) -> Option<usize> {
    market
        .outcomes
        .iter()
        .position(|o| direction.matches_outcome(o))
}

/// Token id for one side of the market, resolved by outcome label
pub fn token_for_direction(market: &CandidateMarket, direction: Direction) -> Option<&str> {
    let idx = outcome_index(market, direction)?;
    market.token_ids.get(idx).map(String::as_str)
}

/// Traded price (0..1) of the Up side
///
/// Gamma's last trade refers to the first outcome token; outcome prices are
/// the fallback when the market has not traded yet.
pub fn up_price(market: &CandidateMarket) -> Option<Decimal> {
    let up = outcome_index(market, Direction::Up)?;
    match market.last_trade_price {
        Some(ltp) if up == 0 => Some(ltp),
        Some(ltp) => Some(Decimal::ONE - ltp),
        None => market.outcome_prices.get(up).copied(),
    }
}
