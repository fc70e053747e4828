//! Polymarket Types - wire formats and the normalised market view

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Open/close for one interval window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPrices {
    pub open: Option<Decimal>,
    pub close: Option<Decimal>,
}

/// Normalised Gamma market used for disambiguation and token lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateMarket {
    pub condition_id: String,
    pub slug: String,
    pub question: String,
    pub outcomes: Vec<String>,
    pub token_ids: Vec<String>,
    pub outcome_prices: Vec<Decimal>,
    /// Last trade of the first outcome token (0..1)
    pub last_trade_price: Option<Decimal>,
    pub end_time: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
}

impl CandidateMarket {
    pub fn is_binary(&self) -> bool {
        self.outcomes.len() == 2 && self.token_ids.len() == 2
    }
}

/// `GET <crypto-price>?symbol=..&eventStartTime=..&variant=..&endDate=..`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoPriceResponse {
    #[serde(default)]
    pub open_price: Option<Decimal>,
    #[serde(default)]
    pub close_price: Option<Decimal>,
}

impl From<CryptoPriceResponse> for PeriodPrices {
    fn from(r: CryptoPriceResponse) -> Self {
        Self {
            open: r.open_price,
            close: r.close_price,
        }
    }
}

/// Market from Gamma API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketResponse {
    #[serde(default)]
    pub condition_id: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub question: String,
    /// JSON string like "[\"Up\", \"Down\"]" - deserialized manually
    #[serde(default, deserialize_with = "deserialize_json_string_opt")]
    pub outcomes: Vec<String>,
    /// JSON string with token IDs like "[\"123\", \"456\"]"
    #[serde(default, deserialize_with = "deserialize_json_string_opt")]
    pub clob_token_ids: Vec<String>,
    /// JSON string with outcome prices like "[\"0.12\", \"0.88\"]"
    #[serde(default, deserialize_with = "deserialize_json_string_opt")]
    pub outcome_prices: Vec<String>,
    #[serde(default)]
    pub last_trade_price: Option<Decimal>,
    #[serde(default)]
    pub active: bool,
    pub closed: Option<bool>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Helper to deserialize optional JSON string arrays
fn deserialize_json_string_opt<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}

fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl From<MarketResponse> for CandidateMarket {
    fn from(m: MarketResponse) -> Self {
        let outcome_prices = m
            .outcome_prices
            .iter()
            .filter_map(|p| Decimal::from_str(p.trim()).ok())
            .collect();

        Self {
            condition_id: m.condition_id,
            slug: m.slug.unwrap_or_default(),
            question: m.question,
            outcomes: m.outcomes,
            token_ids: m.clob_token_ids,
            outcome_prices,
            last_trade_price: m.last_trade_price,
            end_time: m.end_date.as_deref().and_then(parse_end_date),
            active: m.active,
            closed: m.closed.unwrap_or(false),
        }
    }
}

/// `GET /last_trade_price?token_id=..`
#[derive(Debug, Clone, Deserialize)]
pub struct LastTradePriceResponse {
    pub price: String,
    #[serde(default)]
    pub side: Option<String>,
}

/// `GET /price?token_id=..&side=..`
#[derive(Debug, Clone, Deserialize)]
pub struct PriceResponse {
    pub price: String,
}

/// L2 API credentials derived from the signing key
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}
