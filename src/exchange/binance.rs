//! Binance market data client
//!
//! REST klines and 24h ticker, plus the single-stream kline WebSocket.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::candles::{KlineEvent, SubscriptionGeneration};
use crate::config::ExchangeConfig;
use crate::exchange::{CandleProvider, KlineSubscription, TimeRange};
use crate::types::{Candle, Interval, Ticker24h};

const KLINE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
    max_reconnect_attempts: u32,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            max_reconnect_attempts: config.max_reconnect_attempts,
        })
    }

    fn build_stream_url(&self, symbol: &str, interval: Interval) -> String {
        format!(
            "{}/{}@kline_{}",
            self.ws_url,
            symbol.to_lowercase(),
            interval.as_str()
        )
    }

    async fn run_stream(
        url: String,
        generation: SubscriptionGeneration,
        max_reconnect_attempts: u32,
        tx: Sender<KlineEvent>,
    ) {
        let mut reconnect_attempts = 0u32;
        let base_delay = Duration::from_secs(1);
        let max_delay = Duration::from_secs(60);

        loop {
            tracing::info!(
                source = %"Binance",
                url = %url,
                %generation,
                attempt = reconnect_attempts,
                "Connecting to kline stream..."
            );

            match connect_async(&url).await {
                Ok((ws_stream, _)) => {
                    reconnect_attempts = 0;
                    tracing::info!(source = %"Binance", %generation, "✅ Kline stream connected");

                    let (mut write, mut read) = ws_stream.split();
                    loop {
                        match read.next().await {
                            Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                                Ok(Some((candle, closed))) => {
                                    let event = KlineEvent {
                                        generation,
                                        candle,
                                        closed,
                                    };
                                    if tx.send(event).await.is_err() {
                                        // Consumer is gone, subscription torn down
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::warn!(source = %"Binance", error = %e, "Failed to parse kline message");
                                }
                            },
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                tracing::warn!(source = %"Binance", "Connection closed by server");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!(source = %"Binance", error = %e, "WebSocket error");
                                break;
                            }
                            None => {
                                tracing::warn!(source = %"Binance", "Stream ended");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(source = %"Binance", error = %e, "Connection failed");
                }
            }

            if tx.is_closed() {
                return;
            }

            reconnect_attempts += 1;
            if reconnect_attempts > max_reconnect_attempts {
                tracing::error!(
                    source = %"Binance",
                    %generation,
                    "Max reconnection attempts ({}) reached, kline stream stopped",
                    max_reconnect_attempts
                );
                return;
            }
            let delay = std::cmp::min(base_delay * reconnect_attempts, max_delay);
            tracing::info!(
                source = %"Binance",
                delay_secs = delay.as_secs(),
                attempt = reconnect_attempts,
                "🔄 Reconnecting in {} seconds...", delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl CandleProvider for BinanceClient {
    fn name(&self) -> &'static str {
        "Binance"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        range: Option<TimeRange>,
    ) -> Result<Vec<Candle>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.rest_url,
            symbol,
            interval.as_str(),
            limit
        );
        if let Some(range) = range {
            if let Some(start) = range.start_ms {
                url.push_str(&format!("&startTime={}", start));
            }
            if let Some(end) = range.end_ms {
                url.push_str(&format!("&endTime={}", end));
            }
        }

        tracing::debug!(symbol, interval = %interval, limit, "📥 Fetching historical candles");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch klines from Binance")?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        // [[open_time, open, high, low, close, volume, close_time, ...], ...]
        let rows: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline_row(row)).collect();

        tracing::info!(
            symbol,
            interval = %interval,
            count = candles.len(),
            "✅ Historical candles fetched"
        );

        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker24h> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.rest_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch 24h ticker")?;

        if !response.status().is_success() {
            bail!("Failed to get 24h ticker: {}", response.status());
        }

        let raw: RawTicker = response
            .json()
            .await
            .context("Failed to parse 24h ticker response")?;

        raw.try_into()
    }

    fn subscribe(
        &self,
        symbol: &str,
        interval: Interval,
        generation: SubscriptionGeneration,
    ) -> KlineSubscription {
        let (tx, rx) = mpsc::channel(KLINE_CHANNEL_CAPACITY);
        let url = self.build_stream_url(symbol, interval);
        let task = tokio::spawn(Self::run_stream(
            url,
            generation,
            self.max_reconnect_attempts,
            tx,
        ));
        KlineSubscription::new(generation, rx, task)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    price_change: String,
    price_change_percent: String,
    last_price: String,
    high_price: String,
    low_price: String,
    volume: String,
}

impl TryFrom<RawTicker> for Ticker24h {
    type Error = anyhow::Error;

    fn try_from(raw: RawTicker) -> Result<Self> {
        Ok(Ticker24h {
            last_price: parse_decimal(&raw.last_price, "lastPrice")?,
            price_change: parse_decimal(&raw.price_change, "priceChange")?,
            price_change_percent: parse_decimal(&raw.price_change_percent, "priceChangePercent")?,
            high_price: parse_decimal(&raw.high_price, "highPrice")?,
            low_price: parse_decimal(&raw.low_price, "lowPrice")?,
            volume: parse_decimal(&raw.volume, "volume")?,
        })
    }
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal in {}: '{}'", field, raw))
}

fn value_decimal(value: &serde_json::Value) -> Option<Decimal> {
    Decimal::from_str(value.as_str()?).ok()
}

/// One REST kline row; open time arrives in ms and is stored in seconds
fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    Some(Candle {
        time: row[0].as_i64()? / 1000,
        open: value_decimal(&row[1])?,
        high: value_decimal(&row[2])?,
        low: value_decimal(&row[3])?,
        close: value_decimal(&row[4])?,
        volume: value_decimal(&row[5])?,
    })
}

/// Kline stream payload: `{"e":"kline","s":"BTCUSDT","k":{"t":..,"o":..,"x":false,..}}`
fn parse_kline_message(text: &str) -> Result<Option<(Candle, bool)>> {
    let message: serde_json::Value = serde_json::from_str(text)?;
    let Some(k) = message.get("k") else {
        return Ok(None);
    };

    let open_time = k["t"].as_i64().context("Missing kline open time")?;
    let candle = Candle {
        time: open_time / 1000,
        open: value_decimal(&k["o"]).context("Missing kline open")?,
        high: value_decimal(&k["h"]).context("Missing kline high")?,
        low: value_decimal(&k["l"]).context("Missing kline low")?,
        close: value_decimal(&k["c"]).context("Missing kline close")?,
        volume: value_decimal(&k["v"]).context("Missing kline volume")?,
    };
    let closed = k["x"].as_bool().unwrap_or(false);
    Ok(Some((candle, closed)))
}
