//! Core types used throughout PolyOverlay
//!
//! Defines symbols, intervals, candles and tickers shared by the exchange
//! feed, the prediction-market side and the render path.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exchange symbol with its display metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolConfig {
    /// Exchange trading pair (e.g., "BTCUSDT")
    pub symbol: &'static str,
    pub name: &'static str,
    pub display_name: &'static str,
    pub base_asset: &'static str,
    pub quote_asset: &'static str,
    pub price_precision: u32,
    /// Keyword used to locate this asset's up/down markets, if it has any
    pub market_keyword: Option<&'static str>,
}

impl SymbolConfig {
    /// Whether the prediction market lists interval markets for this symbol
    pub fn has_prediction_markets(&self) -> bool {
        self.market_keyword.is_some()
    }
}

impl fmt::Display for SymbolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Supported symbols
pub const SYMBOLS: &[SymbolConfig] = &[
    SymbolConfig {
        symbol: "BTCUSDT",
        name: "Bitcoin",
        display_name: "BTC/USDT",
        base_asset: "BTC",
        quote_asset: "USDT",
        price_precision: 2,
        market_keyword: Some("bitcoin"),
    },
    SymbolConfig {
        symbol: "ETHUSDT",
        name: "Ethereum",
        display_name: "ETH/USDT",
        base_asset: "ETH",
        quote_asset: "USDT",
        price_precision: 2,
        market_keyword: Some("ethereum"),
    },
    SymbolConfig {
        symbol: "SOLUSDT",
        name: "Solana",
        display_name: "SOL/USDT",
        base_asset: "SOL",
        quote_asset: "USDT",
        price_precision: 2,
        market_keyword: Some("solana"),
    },
    SymbolConfig {
        symbol: "XRPUSDT",
        name: "XRP",
        display_name: "XRP/USDT",
        base_asset: "XRP",
        quote_asset: "USDT",
        price_precision: 4,
        market_keyword: Some("xrp"),
    },
    SymbolConfig {
        symbol: "BNBUSDT",
        name: "BNB",
        display_name: "BNB/USDT",
        base_asset: "BNB",
        quote_asset: "USDT",
        price_precision: 2,
        market_keyword: None,
    },
    SymbolConfig {
        symbol: "ADAUSDT",
        name: "Cardano",
        display_name: "ADA/USDT",
        base_asset: "ADA",
        quote_asset: "USDT",
        price_precision: 4,
        market_keyword: None,
    },
    SymbolConfig {
        symbol: "DOGEUSDT",
        name: "Dogecoin",
        display_name: "DOGE/USDT",
        base_asset: "DOGE",
        quote_asset: "USDT",
        price_precision: 5,
        market_keyword: None,
    },
];

/// Look up a symbol by exchange pair or base asset (case-insensitive)
pub fn find_symbol(s: &str) -> Option<&'static SymbolConfig> {
    let s = s.trim().to_uppercase();
    SYMBOLS
        .iter()
        .find(|c| c.symbol == s || c.base_asset == s)
}

/// Reporting granularity shared by the exchange and the prediction market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Interval {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    /// Calendar month; has no fixed duration
    Month1,
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Hour1
    }
}

impl Interval {
    pub const ALL: [Interval; 15] = [
        Interval::Min1,
        Interval::Min3,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
        Interval::Hour2,
        Interval::Hour4,
        Interval::Hour6,
        Interval::Hour8,
        Interval::Hour12,
        Interval::Day1,
        Interval::Day3,
        Interval::Week1,
        Interval::Month1,
    ];

    /// Fixed duration in seconds, `None` for calendar-based intervals
    pub fn duration_secs(&self) -> Option<i64> {
        let secs = match self {
            Interval::Min1 => 60,
            Interval::Min3 => 3 * 60,
            Interval::Min5 => 5 * 60,
            Interval::Min15 => 15 * 60,
            Interval::Min30 => 30 * 60,
            Interval::Hour1 => 3600,
            Interval::Hour2 => 2 * 3600,
            Interval::Hour4 => 4 * 3600,
            Interval::Hour6 => 6 * 3600,
            Interval::Hour8 => 8 * 3600,
            Interval::Hour12 => 12 * 3600,
            Interval::Day1 => 86_400,
            Interval::Day3 => 3 * 86_400,
            Interval::Week1 => 7 * 86_400,
            Interval::Month1 => return None,
        };
        Some(secs)
    }

    /// Exchange wire label (e.g., "15m")
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Min1 => "1m",
            Interval::Min3 => "3m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Min30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown interval label '{0}'")]
pub struct IntervalParseError(pub String);

impl FromStr for Interval {
    type Err = IntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "1M" (month) and "1m" (minute) differ only by case
        let s = s.trim();
        Interval::ALL
            .iter()
            .copied()
            .find(|iv| iv.as_str() == s)
            .ok_or_else(|| IntervalParseError(s.to_string()))
    }
}

impl From<Interval> for String {
    fn from(iv: Interval) -> Self {
        iv.as_str().to_string()
    }
}

impl TryFrom<String> for Interval {
    type Error = IntervalParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a candle data source; a change means a full redraw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    pub symbol: &'static str,
    pub interval: Interval,
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

impl Serialize for SymbolKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Trading direction on an up/down market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Up
    }
}

impl Direction {
    /// Whether an outcome label belongs to this direction
    pub fn matches_outcome(&self, outcome: &str) -> bool {
        let outcome = outcome.trim().to_lowercase();
        match self {
            Direction::Up => outcome == "up" || outcome == "yes",
            Direction::Down => outcome == "down" || outcome == "no",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "Up"),
            Direction::Down => write!(f, "Down"),
        }
    }
}

/// OHLCV candle keyed by its window-open instant (unix seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// 24h rolling ticker summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker24h {
    pub last_price: Decimal,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_labels_round_trip_case_sensitively() {
        assert_eq!("1m".parse::<Interval>().unwrap(), Interval::Min1);
        assert_eq!("1M".parse::<Interval>().unwrap(), Interval::Month1);
        assert_eq!("4h".parse::<Interval>().unwrap(), Interval::Hour4);
        assert!("7m".parse::<Interval>().is_err());
    }

    #[test]
    fn month_has_no_fixed_duration() {
        assert_eq!(Interval::Month1.duration_secs(), None);
        assert_eq!(Interval::Hour4.duration_secs(), Some(14_400));
    }

    #[test]
    fn symbol_lookup_accepts_pair_or_base() {
        assert_eq!(find_symbol("btc").map(|s| s.symbol), Some("BTCUSDT"));
        assert_eq!(find_symbol("ETHUSDT").map(|s| s.base_asset), Some("ETH"));
        assert!(find_symbol("LTC").is_none());
        assert!(!find_symbol("DOGE").unwrap().has_prediction_markets());
    }

    #[test]
    fn outcome_labels_map_to_direction() {
        assert!(Direction::Up.matches_outcome("Up"));
        assert!(Direction::Down.matches_outcome(" NO "));
        assert!(!Direction::Up.matches_outcome("Down"));
    }
}
