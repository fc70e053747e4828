//! Exchange module - candle and ticker market data
//!
//! REST pull for historical candles and the 24h ticker, plus a push channel
//! of live kline deltas keyed by (symbol, interval).

mod binance;

pub use binance::BinanceClient;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::candles::{KlineEvent, SubscriptionGeneration};
use crate::types::{Candle, Interval, Ticker24h};

/// Optional explicit time range for a historical fetch (unix milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

/// Trait for exchange market-data providers
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Fetch historical candles, oldest first
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        range: Option<TimeRange>,
    ) -> Result<Vec<Candle>>;

    /// Fetch the 24h rolling ticker
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker24h>;

    /// Open a live kline push channel; every event carries `generation`
    fn subscribe(
        &self,
        symbol: &str,
        interval: Interval,
        generation: SubscriptionGeneration,
    ) -> KlineSubscription;
}

/// Live push channel; closing or dropping it stops the feed task
#[derive(Debug)]
pub struct KlineSubscription {
    generation: SubscriptionGeneration,
    rx: mpsc::Receiver<KlineEvent>,
    task: Option<JoinHandle<()>>,
}

impl KlineSubscription {
    pub fn new(
        generation: SubscriptionGeneration,
        rx: mpsc::Receiver<KlineEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            generation,
            rx,
            task: Some(task),
        }
    }

    /// Subscription fed from an arbitrary channel (replays, tests)
    pub fn from_channel(generation: SubscriptionGeneration, rx: mpsc::Receiver<KlineEvent>) -> Self {
        Self {
            generation,
            rx,
            task: None,
        }
    }

    pub fn generation(&self) -> SubscriptionGeneration {
        self.generation
    }

    /// Next delta; `None` once the feed has ended
    pub async fn recv(&mut self) -> Option<KlineEvent> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// No feed task is running for this subscription
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for KlineSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
