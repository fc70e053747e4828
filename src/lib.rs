//! PolyOverlay Library
//!
//! Live candle chart overlay for Polymarket up/down interval markets

pub mod candles;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod overlay;
pub mod period;
pub mod persistence;
pub mod polymarket;
pub mod render;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
