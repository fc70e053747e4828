//! Candles module - live candle buffer
//!
//! Keeps the candle series for the active (symbol, interval) subscription
//! consistent under a bulk REST load followed by push deltas.

mod stream;

pub use stream::{CandleStream, CandleUpdate, IgnoreReason, KlineEvent, SubscriptionGeneration};
